//! Baseline and history persistence.
//!
//! [`Store`] is the abstract contract the reconciler writes through; the
//! SQLite implementation lives in [`sqlite`]. One reconciliation performs
//! many upserts and history appends inside a single `begin`/`commit` pair,
//! and concurrent scans must observe either the pre- or post-state of one
//! another, never an interleaving.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::models::{FileRecord, HistoryEvent};

/// Errors from the persistence layer. Read-only and busy conditions get
/// their own kinds so callers can phrase them for users.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database is read-only")]
    ReadOnly,

    #[error("database is busy")]
    Busy,

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Sql(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                rusqlite::ErrorCode::ReadOnly => return Self::ReadOnly,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    return Self::Busy
                }
                _ => {}
            }
        }
        Self::Sql(err)
    }
}

/// Transactional baseline + append-only history storage.
pub trait Store: Send {
    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    /// Best effort; failures are logged, not returned.
    fn rollback(&self);

    /// All baseline records, ordered by path.
    fn load_baseline(&self) -> Result<Vec<FileRecord>, StoreError>;
    fn load_record(&self, path: &str) -> Result<Option<FileRecord>, StoreError>;
    /// Insert or replace one record. The row signature is computed here.
    fn upsert_record(&self, record: &FileRecord) -> Result<(), StoreError>;
    /// Wipe baseline and history.
    fn clear_all(&self) -> Result<(), StoreError>;

    fn append_history(&self, event: &HistoryEvent) -> Result<(), StoreError>;
    /// Most recent first.
    fn load_history(&self, limit: u32) -> Result<Vec<HistoryEvent>, StoreError>;

    /// Key for the row signature scheme. Empty disables signing and treats
    /// stored rows as implicitly valid.
    fn set_hmac_key(&mut self, key: Vec<u8>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_failure_codes_map_to_distinct_kinds() {
        let readonly = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_READONLY),
            None,
        );
        assert!(matches!(StoreError::from(readonly), StoreError::ReadOnly));

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StoreError::from(busy), StoreError::Busy));

        let other = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(StoreError::from(other), StoreError::Sql(_)));
    }
}
