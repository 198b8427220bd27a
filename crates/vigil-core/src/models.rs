//! Data models for the integrity engine.
//!
//! All structs are serializable and map onto the SQLite schema in
//! [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a file after reconciliation against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FileStatus {
    /// Matches the baseline.
    #[default]
    Ok,
    /// Content or tracked metadata differs from the baseline.
    Changed,
    /// Not present in the baseline.
    New,
    /// Present in the baseline but gone from disk.
    Deleted,
    /// Fingerprint could not be acquired.
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Changed => "Changed",
            Self::New => "New",
            Self::Deleted => "Deleted",
            Self::Error => "Error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Changed" => Self::Changed,
            "New" => Self::New,
            "Deleted" => Self::Deleted,
            "Error" => Self::Error,
            _ => Self::Ok,
        }
    }

    /// Integer code used on the history wire. Ok=0, Changed=1, New=2,
    /// Deleted=3, Error=4.
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Changed => 1,
            Self::New => 2,
            Self::Deleted => 3,
            Self::Error => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Changed,
            2 => Self::New,
            3 => Self::Deleted,
            4 => Self::Error,
            _ => Self::Ok,
        }
    }
}

/// Attributes collected for one regular file during a scan.
///
/// `path` is always absolute. An empty `hash` means acquisition failed and
/// `error_reason` carries why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub path: String,
    /// Lowercase hex SHA-256 of the file content, empty on read failure.
    pub hash: String,
    pub size: u64,
    /// Modification time as whole seconds since the epoch, UTC.
    /// Sub-second precision is dropped on purpose so change detection stays
    /// stable across filesystems.
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
    /// Raw mode bits from the stat call (zero off Unix).
    pub mode: u32,
    pub device: u64,
    pub inode: u64,
    pub hardlink_count: u64,
    /// Portable rwxrwxrwx bitmask (`mode & 0o777` on Unix).
    pub permissions: u32,
    /// Resolved owner name, empty when the name service has no answer.
    pub owner: String,
    /// Resolved group name, empty when the name service has no answer.
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// A [`FileMetadata`] plus the scan bookkeeping persisted in the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub metadata: FileMetadata,
    pub status: FileStatus,
    /// HMAC-SHA-256 row signature, hex. Empty when no key is configured.
    pub signature: String,
    /// Hash the baseline held before this scan.
    pub previous_hash: String,
    pub updated_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    pub scanner_version: String,
    /// Whether the stored signature verified on load. Rows written before a
    /// key was configured are implicitly trusted.
    pub signature_valid: bool,
    pub metadata_changed: bool,
    pub permissions_changed: bool,
    pub owner_changed: bool,
    pub mtime_changed: bool,
    pub inode_changed: bool,
}

impl FileRecord {
    /// A fresh record for metadata collected this scan, before
    /// classification.
    pub fn new(metadata: FileMetadata, scan_time: DateTime<Utc>, scanner_version: &str) -> Self {
        Self {
            metadata,
            status: FileStatus::Ok,
            signature: String::new(),
            previous_hash: String::new(),
            updated_at: scan_time,
            last_checked: scan_time,
            scanner_version: scanner_version.to_string(),
            signature_valid: true,
            metadata_changed: false,
            permissions_changed: false,
            owner_changed: false,
            mtime_changed: false,
            inode_changed: false,
        }
    }
}

/// One append-only history row. `old_status` is `None` for the first
/// observation of a path (encoded as NULL in storage, `-1` on the wire).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub scan_time: DateTime<Utc>,
    pub file_path: String,
    pub old_status: Option<i32>,
    pub new_status: i32,
    pub old_hash: String,
    pub new_hash: String,
    pub comment: String,
}

/// Per-scan counters. Deleted files are counted separately because they are
/// no longer part of the scanned state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_files: u64,
    pub changed_count: u64,
    pub new_count: u64,
    pub deleted_count: u64,
    pub error_count: u64,
}

impl ScanSummary {
    /// Collapsed status for dashboards: errors dominate, then any churn,
    /// then Ok.
    pub fn overall_status(&self) -> FileStatus {
        if self.error_count > 0 {
            return FileStatus::Error;
        }
        if self.changed_count > 0 || self.new_count > 0 || self.deleted_count > 0 {
            return FileStatus::Changed;
        }
        FileStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            FileStatus::Ok,
            FileStatus::Changed,
            FileStatus::New,
            FileStatus::Deleted,
            FileStatus::Error,
        ] {
            assert_eq!(FileStatus::from_code(status.code()), status);
            assert_eq!(FileStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_label_defaults_to_ok() {
        assert_eq!(FileStatus::from_str(""), FileStatus::Ok);
        assert_eq!(FileStatus::from_str("garbage"), FileStatus::Ok);
    }

    #[test]
    fn overall_status_prefers_errors() {
        let mut summary = ScanSummary::default();
        assert_eq!(summary.overall_status(), FileStatus::Ok);

        summary.new_count = 2;
        assert_eq!(summary.overall_status(), FileStatus::Changed);

        summary.error_count = 1;
        assert_eq!(summary.overall_status(), FileStatus::Error);
    }
}
