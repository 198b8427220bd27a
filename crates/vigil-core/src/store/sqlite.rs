//! SQLite implementation of the store contract.
//!
//! Handles:
//! - schema creation and forward migrations driven by `meta.schema_version`
//! - legacy status labels and missing columns from older databases
//! - the HMAC-SHA-256 row signature over each record's canonical payload
//! - explicit transactions with bounded retries when the database is busy
//!
//! Every worker opens its own handle against the same database file;
//! serialization between handles is SQLite's own locking.

use crate::models::{FileMetadata, FileRecord, FileStatus, HistoryEvent};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::Sha256;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Current schema version recorded in the `meta` table.
const SCHEMA_VERSION: i32 = 2;

/// How many times `begin` retries a busy database before giving up.
const BUSY_RETRIES: u32 = 5;
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Legacy status labels rewritten on open. Migration is never destructive.
const STATUS_MIGRATIONS: &[(&str, &str)] = &[
    ("Unchanged", "Ok"),
    ("Modified", "Changed"),
    ("MetaChanged", "Changed"),
    ("Failed", "Error"),
    ("SignatureError", "Error"),
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
    hmac_key: Vec<u8>,
}

impl SqliteStore {
    /// Open or create the database at `path` and bring the schema up to
    /// date. A migration failure is fatal here; scans must not run against
    /// a half-migrated database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Migration(err.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(StoreError::from)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(StoreError::from)?;

        let store = Self {
            conn: Mutex::new(conn),
            hmac_key: Vec::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        let store = Self {
            conn: Mutex::new(conn),
            hmac_key: Vec::new(),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::create_tables(&conn).map_err(|err| StoreError::Migration(err.to_string()))?;
        Self::upgrade_legacy_columns(&conn)
            .map_err(|err| StoreError::Migration(err.to_string()))?;
        Self::rewrite_legacy_statuses(&conn)
            .map_err(|err| StoreError::Migration(err.to_string()))?;
        Self::ensure_schema_version(&conn)
            .map_err(|err| StoreError::Migration(err.to_string()))?;
        Ok(())
    }

    fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                gid INTEGER NOT NULL,
                mode INTEGER NOT NULL,
                device INTEGER NOT NULL,
                inode INTEGER NOT NULL,
                hardlink_count INTEGER NOT NULL,
                permissions INTEGER,
                owner TEXT,
                group_name TEXT,
                status TEXT NOT NULL DEFAULT 'Ok',
                signature TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_checked TEXT NOT NULL,
                scanner_version TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scan_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_time TEXT NOT NULL,
                file_path TEXT NOT NULL,
                old_status INTEGER,
                new_status INTEGER NOT NULL,
                old_hash TEXT,
                new_hash TEXT,
                comment TEXT
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
    }

    /// Databases written by old versions may be missing columns added
    /// later. They are added with safe defaults; the 'Unchanged' default for
    /// `status` is the historical label and gets rewritten right after.
    fn upgrade_legacy_columns(conn: &Connection) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare("PRAGMA table_info(files)")?;
        let existing: HashSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        let wanted: &[(&str, &str)] = &[
            ("status", "TEXT NOT NULL DEFAULT 'Unchanged'"),
            ("permissions", "INTEGER"),
            ("owner", "TEXT"),
            ("group_name", "TEXT"),
        ];
        for (column, definition) in wanted {
            if !existing.contains(*column) {
                debug!(column, "adding missing column to files table");
                conn.execute_batch(&format!(
                    "ALTER TABLE files ADD COLUMN {column} {definition};"
                ))?;
            }
        }
        Ok(())
    }

    fn rewrite_legacy_statuses(conn: &Connection) -> rusqlite::Result<()> {
        for (old, new) in STATUS_MIGRATIONS {
            let rewritten = conn.execute(
                "UPDATE files SET status = ?1 WHERE status = ?2",
                params![new, old],
            )?;
            if rewritten > 0 {
                debug!(%old, %new, rewritten, "migrated legacy status labels");
            }
        }
        Ok(())
    }

    fn ensure_schema_version(conn: &Connection) -> rusqlite::Result<()> {
        let current: i32 = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version' LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current < SCHEMA_VERSION {
            // Version-specific migrations slot in here; so far the
            // column/label upgrades above cover everything.
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Ok(())
    }

    /// Canonical signature payload:
    /// `path|size|mtime|uid|gid|mode|hash`, HMAC-SHA-256, hex. Empty when
    /// no key is configured.
    fn compute_signature(&self, meta: &FileMetadata) -> String {
        if self.hmac_key.is_empty() {
            return String::new();
        }

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.hmac_key)
            .expect("HMAC can take key of any size");
        mac.update(meta.path.as_bytes());
        for field in [
            meta.size.to_string(),
            meta.mtime.to_string(),
            meta.uid.to_string(),
            meta.gid.to_string(),
            meta.mode.to_string(),
        ] {
            mac.update(b"|");
            mac.update(field.as_bytes());
        }
        mac.update(b"|");
        mac.update(meta.hash.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Rows persisted before a key was configured carry an empty signature
    /// and are implicitly trusted when no key is set.
    fn verify_signature(&self, record: &FileRecord) -> bool {
        if self.hmac_key.is_empty() {
            return true;
        }
        let expected = self.compute_signature(&record.metadata);
        !expected.is_empty() && expected == record.signature
    }

    fn hydrate_record(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let metadata = FileMetadata {
            path: row.get(0)?,
            hash: row.get(1)?,
            size: row.get::<_, i64>(2)? as u64,
            mtime: row.get(3)?,
            uid: row.get(4)?,
            gid: row.get(5)?,
            mode: row.get(6)?,
            device: row.get::<_, i64>(7)? as u64,
            inode: row.get::<_, i64>(8)? as u64,
            hardlink_count: row.get::<_, i64>(9)? as u64,
            permissions: row.get::<_, Option<u32>>(10)?.unwrap_or(0),
            owner: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            group: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            error_reason: None,
        };

        let previous_hash = metadata.hash.clone();
        let mut record = FileRecord {
            metadata,
            status: FileStatus::from_str(&row.get::<_, String>(13)?),
            signature: row.get(14)?,
            previous_hash,
            updated_at: parse_timestamp(&row.get::<_, String>(15)?),
            last_checked: parse_timestamp(&row.get::<_, String>(16)?),
            scanner_version: row.get(17)?,
            signature_valid: true,
            metadata_changed: false,
            permissions_changed: false,
            owner_changed: false,
            mtime_changed: false,
            inode_changed: false,
        };
        record.signature_valid = self.verify_signature(&record);
        Ok(record)
    }
}

const RECORD_COLUMNS: &str = "path, hash, size, mtime, uid, gid, mode, device, inode, \
     hardlink_count, permissions, owner, group_name, status, signature, \
     updated_at, last_checked, scanner_version";

impl Store for SqliteStore {
    fn begin(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let mut attempts = 0;
        loop {
            match conn.execute_batch("BEGIN IMMEDIATE") {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let err = StoreError::from(err);
                    if matches!(err, StoreError::Busy) && attempts < BUSY_RETRIES {
                        attempts += 1;
                        debug!(attempts, "database busy, retrying begin");
                        std::thread::sleep(BUSY_BACKOFF);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn commit(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("COMMIT").map_err(StoreError::from)
    }

    fn rollback(&self) {
        let conn = self.conn.lock();
        if let Err(err) = conn.execute_batch("ROLLBACK") {
            warn!(%err, "rollback failed");
        }
    }

    fn load_baseline(&self) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM files ORDER BY path ASC"))?;
        let records = stmt
            .query_map([], |row| self.hydrate_record(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn load_record(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM files WHERE path = ?1 LIMIT 1"),
            params![path],
            |row| self.hydrate_record(row),
        )
        .optional()
        .map_err(StoreError::from)
    }

    fn upsert_record(&self, record: &FileRecord) -> Result<(), StoreError> {
        let signature = self.compute_signature(&record.metadata);
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO files (path, hash, size, mtime, uid, gid, mode, device, inode,
                               hardlink_count, permissions, owner, group_name, status,
                               signature, updated_at, last_checked, scanner_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                mtime = excluded.mtime,
                uid = excluded.uid,
                gid = excluded.gid,
                mode = excluded.mode,
                device = excluded.device,
                inode = excluded.inode,
                hardlink_count = excluded.hardlink_count,
                permissions = excluded.permissions,
                owner = excluded.owner,
                group_name = excluded.group_name,
                status = excluded.status,
                signature = excluded.signature,
                updated_at = excluded.updated_at,
                last_checked = excluded.last_checked,
                scanner_version = excluded.scanner_version
            "#,
            params![
                record.metadata.path,
                record.metadata.hash,
                record.metadata.size as i64,
                record.metadata.mtime,
                record.metadata.uid,
                record.metadata.gid,
                record.metadata.mode,
                record.metadata.device as i64,
                record.metadata.inode as i64,
                record.metadata.hardlink_count as i64,
                record.metadata.permissions,
                record.metadata.owner,
                record.metadata.group,
                record.status.as_str(),
                signature,
                record.updated_at.to_rfc3339(),
                record.last_checked.to_rfc3339(),
                record.scanner_version,
            ],
        )?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files", [])?;
        conn.execute("DELETE FROM scan_history", [])?;
        Ok(())
    }

    fn append_history(&self, event: &HistoryEvent) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scan_history (scan_time, file_path, old_status, new_status,
                                       old_hash, new_hash, comment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.scan_time.to_rfc3339(),
                event.file_path,
                event.old_status,
                event.new_status,
                event.old_hash,
                event.new_hash,
                event.comment,
            ],
        )?;
        Ok(())
    }

    fn load_history(&self, limit: u32) -> Result<Vec<HistoryEvent>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT scan_time, file_path, old_status, new_status, old_hash, new_hash, comment
             FROM scan_history ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit], |row| {
                Ok(HistoryEvent {
                    scan_time: parse_timestamp(&row.get::<_, String>(0)?),
                    file_path: row.get(1)?,
                    old_status: row.get(2)?,
                    new_status: row.get(3)?,
                    old_hash: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    new_hash: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    comment: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn set_hmac_key(&mut self, key: Vec<u8>) {
        self.hmac_key = key;
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
