//! Join-and-classify: merges a fresh scan with the persisted baseline.
//!
//! Every file from the new state is classified as Ok, Changed, New or
//! Error; baseline entries that disappeared from disk become Deleted. The
//! merged state and the history rows for all transitions are written
//! through the store inside one transaction, so a successful scan persists
//! exactly one baseline snapshot.

use crate::error::{Error, Result};
use crate::models::{FileMetadata, FileRecord, FileStatus, HistoryEvent, ScanSummary};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Result of one reconciliation. `signature_error_count` tracks baseline
/// rows whose stored signature failed to verify; those files are forced to
/// Changed regardless of content equality.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub summary: ScanSummary,
    pub records: Vec<FileRecord>,
    pub signature_error_count: u64,
}

pub struct Reconciler<'a> {
    store: &'a dyn Store,
    scanner_version: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store, scanner_version: &'a str) -> Self {
        Self {
            store,
            scanner_version,
        }
    }

    /// Merge `new_state` with the baseline and persist the result. `roots`
    /// are the absolutized scan roots; only baseline paths under a root can
    /// become Deleted. The optional cancel flag is polled at every file;
    /// cancellation rolls back and leaves the previous baseline untouched.
    pub fn reconcile(
        &self,
        new_state: Vec<FileMetadata>,
        roots: &[PathBuf],
        cancel: Option<&AtomicBool>,
    ) -> Result<ScanOutcome> {
        let baseline = self.store.load_baseline()?;
        let mut old_by_path: HashMap<String, FileRecord> = baseline
            .into_iter()
            .map(|record| (record.metadata.path.clone(), record))
            .collect();

        // One timestamp for the whole scan; every history row of this
        // reconciliation carries it.
        let scan_time = Utc::now();

        self.store.begin()?;
        match self.apply(new_state, roots, &mut old_by_path, scan_time, cancel) {
            Ok(outcome) => {
                if let Err(err) = self.store.commit() {
                    self.store.rollback();
                    return Err(err.into());
                }
                info!(
                    total = outcome.summary.total_files,
                    changed = outcome.summary.changed_count,
                    new = outcome.summary.new_count,
                    deleted = outcome.summary.deleted_count,
                    errors = outcome.summary.error_count,
                    "scan reconciled"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.store.rollback();
                Err(err)
            }
        }
    }

    fn apply(
        &self,
        new_state: Vec<FileMetadata>,
        roots: &[PathBuf],
        old_by_path: &mut HashMap<String, FileRecord>,
        scan_time: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
    ) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        for metadata in new_state {
            if is_cancelled(cancel) {
                return Err(Error::Cancelled);
            }

            outcome.summary.total_files += 1;
            let mut record = FileRecord::new(metadata, scan_time, self.scanner_version);

            if record.metadata.hash.is_empty() {
                // Unreadable files stay in the new state so the baseline
                // remembers them, but they never produce history.
                record.status = FileStatus::Error;
                outcome.summary.error_count += 1;
                self.store.upsert_record(&record)?;
                outcome.records.push(record);
                continue;
            }

            match old_by_path.remove(&record.metadata.path) {
                None => {
                    record.status = FileStatus::New;
                    outcome.summary.new_count += 1;
                    self.store.append_history(&HistoryEvent {
                        scan_time,
                        file_path: record.metadata.path.clone(),
                        old_status: None,
                        new_status: FileStatus::New.code(),
                        old_hash: String::new(),
                        new_hash: record.metadata.hash.clone(),
                        comment: "new file detected".into(),
                    })?;
                }
                Some(old) => {
                    record.previous_hash = old.metadata.hash.clone();
                    self.mark_metadata_changes(&mut record, &old);

                    // A row whose stored signature no longer verifies is
                    // treated as changed even when the content matches.
                    let signature_mismatch = !old.signature_valid && !old.signature.is_empty();
                    if signature_mismatch {
                        outcome.signature_error_count += 1;
                    }

                    let changed = record.metadata.hash != old.metadata.hash
                        || record.metadata.permissions != old.metadata.permissions
                        || record.metadata.owner != old.metadata.owner
                        || record.metadata.group != old.metadata.group
                        || record.metadata.inode != old.metadata.inode
                        || record.metadata.mtime != old.metadata.mtime
                        || record.metadata.size != old.metadata.size
                        || signature_mismatch;

                    if changed {
                        record.status = FileStatus::Changed;
                        outcome.summary.changed_count += 1;
                        self.store.append_history(&HistoryEvent {
                            scan_time,
                            file_path: record.metadata.path.clone(),
                            old_status: Some(old.status.code()),
                            new_status: FileStatus::Changed.code(),
                            old_hash: old.metadata.hash.clone(),
                            new_hash: record.metadata.hash.clone(),
                            comment: String::new(),
                        })?;
                    } else {
                        record.status = FileStatus::Ok;
                    }
                }
            }

            self.store.upsert_record(&record)?;
            outcome.records.push(record);
        }

        self.apply_deletions(roots, old_by_path, scan_time, cancel, &mut outcome)?;
        Ok(outcome)
    }

    /// Baseline entries not seen this scan become Deleted when they lie
    /// under a scan root and are really gone from disk. Paths that are
    /// merely excluded now, but still exist, keep their previous status.
    fn apply_deletions(
        &self,
        roots: &[PathBuf],
        old_by_path: &mut HashMap<String, FileRecord>,
        scan_time: DateTime<Utc>,
        cancel: Option<&AtomicBool>,
        outcome: &mut ScanOutcome,
    ) -> Result<()> {
        let mut remaining: Vec<FileRecord> = old_by_path.drain().map(|(_, r)| r).collect();
        remaining.sort_by(|a, b| a.metadata.path.cmp(&b.metadata.path));

        for old in remaining {
            if is_cancelled(cancel) {
                return Err(Error::Cancelled);
            }

            let path = Path::new(&old.metadata.path);
            if !roots.iter().any(|root| path.starts_with(root)) {
                continue;
            }
            if path.exists() {
                continue;
            }
            if old.status == FileStatus::Deleted {
                // Already recorded as deleted.
                continue;
            }

            let mut deleted = old.clone();
            deleted.status = FileStatus::Deleted;
            deleted.previous_hash = old.metadata.hash.clone();
            deleted.updated_at = scan_time;
            deleted.last_checked = scan_time;
            deleted.scanner_version = self.scanner_version.to_string();

            outcome.summary.deleted_count += 1;
            self.store.append_history(&HistoryEvent {
                scan_time,
                file_path: deleted.metadata.path.clone(),
                old_status: Some(old.status.code()),
                new_status: FileStatus::Deleted.code(),
                old_hash: old.metadata.hash.clone(),
                new_hash: String::new(),
                comment: "file deleted".into(),
            })?;
            // The fingerprint is kept on the record so history stays
            // meaningful.
            self.store.upsert_record(&deleted)?;
            outcome.records.push(deleted);
        }
        Ok(())
    }

    fn mark_metadata_changes(&self, record: &mut FileRecord, old: &FileRecord) {
        let new = &record.metadata;
        let prev = &old.metadata;
        record.permissions_changed =
            prev.permissions != new.permissions || prev.mode != new.mode;
        record.owner_changed = prev.owner != new.owner
            || prev.group != new.group
            || prev.uid != new.uid
            || prev.gid != new.gid;
        record.mtime_changed = prev.mtime != new.mtime;
        record.inode_changed = prev.inode != new.inode;
        record.metadata_changed = record.permissions_changed
            || record.owner_changed
            || record.mtime_changed
            || record.inode_changed;
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}
