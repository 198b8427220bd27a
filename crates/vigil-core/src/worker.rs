//! Background scan worker.
//!
//! One worker encapsulates one logical scan: it owns its own store handle,
//! drives the scanner and reconciler on a blocking thread, and reports
//! through a channel of [`WorkerEvent`]s. File events arrive in traversal
//! order and the terminal event comes last, exactly once.
//!
//! Cancellation is cooperative: the flag is polled at every file boundary
//! and at every store write. A cancel before commit rolls the transaction
//! back.

use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::models::{FileRecord, FileStatus, ScanSummary};
use crate::notify::NotifySummary;
use crate::reconcile::{Reconciler, ScanOutcome};
use crate::scanner::Scanner;
use crate::store::{SqliteStore, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Progress and terminal events emitted by a scan worker.
#[derive(Debug)]
pub enum WorkerEvent {
    Progress {
        current: u64,
        total: u64,
    },
    FileProcessed {
        path: String,
    },
    /// Exactly one of `Finished`/`Failed` ends the stream.
    Finished {
        summary: ScanSummary,
        records: Vec<FileRecord>,
        notice: NotifySummary,
    },
    Failed {
        message: String,
    },
}

pub struct ScanWorker {
    config: ScanConfig,
    store: SqliteStore,
    events: mpsc::Sender<WorkerEvent>,
    cancel: Arc<AtomicBool>,
    scanner_version: String,
}

impl ScanWorker {
    /// Opens this worker's own database handle. Failing to open or migrate
    /// the store means scans must not start at all.
    pub fn new(config: ScanConfig, events: mpsc::Sender<WorkerEvent>) -> Result<Self> {
        let mut store = SqliteStore::open(&config.database_path)?;
        store.set_hmac_key(config.hmac_key_bytes());
        Ok(Self {
            config,
            store,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
            scanner_version: format!("vigil-{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Flag shared with whoever may want to cancel this scan.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the scan to completion. Blocking; call through
    /// [`spawn_scan`] or `tokio::task::spawn_blocking`.
    pub fn run(self) {
        match self.scan() {
            Ok(Some(outcome)) => {
                let notice = build_notice(&outcome);
                self.emit(WorkerEvent::Finished {
                    summary: outcome.summary,
                    records: outcome.records,
                    notice,
                });
            }
            Ok(None) => {
                info!("scan cancelled, previous baseline left intact");
                self.emit(WorkerEvent::Finished {
                    summary: ScanSummary::default(),
                    records: Vec::new(),
                    notice: NotifySummary::default(),
                });
            }
            Err(err) => {
                error!(%err, "scan failed");
                self.emit(WorkerEvent::Failed {
                    message: err.to_string(),
                });
            }
        }
    }

    /// `None` means the scan was cancelled before anything was committed.
    fn scan(&self) -> Result<Option<ScanOutcome>> {
        let scanner = Scanner::new(&self.config);
        let paths = scanner.discover();
        let total = paths.len() as u64;
        self.emit(WorkerEvent::Progress { current: 0, total });

        let mut new_state = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let metadata = scanner.examine(path);
            self.emit(WorkerEvent::FileProcessed {
                path: metadata.path.clone(),
            });
            self.emit(WorkerEvent::Progress {
                current: index as u64 + 1,
                total,
            });
            new_state.push(metadata);
        }

        let reconciler = Reconciler::new(&self.store, &self.scanner_version);
        match reconciler.reconcile(new_state, scanner.roots(), Some(&self.cancel)) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(Error::Cancelled) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // The receiver going away is not the worker's problem.
        let _ = self.events.blocking_send(event);
    }
}

/// Launch a worker on the blocking pool. Returns the join handle and the
/// cancel flag.
pub fn spawn_scan(
    config: ScanConfig,
    events: mpsc::Sender<WorkerEvent>,
) -> Result<(tokio::task::JoinHandle<()>, Arc<AtomicBool>)> {
    let worker = ScanWorker::new(config, events)?;
    let cancel = worker.cancel_handle();
    let handle = tokio::task::spawn_blocking(move || worker.run());
    Ok((handle, cancel))
}

/// Aggregate the fine-grained counters the notifier consumes.
fn build_notice(outcome: &ScanOutcome) -> NotifySummary {
    let mut notice = NotifySummary {
        total_files: outcome.summary.total_files,
        deleted_count: outcome.summary.deleted_count,
        new_count: outcome.summary.new_count,
        signature_error_count: outcome.signature_error_count,
        ..Default::default()
    };

    for record in &outcome.records {
        if record.status == FileStatus::Changed {
            if record.metadata.hash != record.previous_hash {
                notice.modified_count += 1;
            }
            if record.metadata_changed {
                notice.meta_changed_count += 1;
            }
        }
        if record.permissions_changed {
            notice.permission_changed_count += 1;
        }
        if record.owner_changed {
            notice.owner_changed_count += 1;
        }
    }
    notice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileMetadata;
    use std::fs;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path, db: &std::path::Path) -> ScanConfig {
        ScanConfig {
            database_path: db.to_path_buf(),
            monitored_directories: vec![root.to_string_lossy().into_owned()],
            ..Default::default()
        }
    }

    async fn drain(mut rx: mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn emits_progress_then_single_terminal_event() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"beta").unwrap();

        let (tx, rx) = mpsc::channel(64);
        let config = test_config(dir.path(), &dir.path().join("state.db"));
        let (handle, _cancel) = spawn_scan(config, tx).unwrap();
        handle.await.unwrap();

        let events = drain(rx).await;
        let finished: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Finished { .. } | WorkerEvent::Failed { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(matches!(events.last().unwrap(), WorkerEvent::Finished { .. }));

        let processed = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::FileProcessed { .. }))
            .count();
        assert_eq!(processed, 2);

        match events.last().unwrap() {
            WorkerEvent::Finished {
                summary, notice, ..
            } => {
                assert_eq!(summary.total_files, 2);
                assert_eq!(summary.new_count, 2);
                assert_eq!(notice.new_count, 2);
                assert_eq!(notice.modified_count, 0);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn cancelled_scan_finishes_without_committing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();

        let (tx, rx) = mpsc::channel(64);
        let config = test_config(dir.path(), &dir.path().join("state.db"));
        let worker = ScanWorker::new(config.clone(), tx).unwrap();
        worker.cancel_handle().store(true, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || worker.run())
            .await
            .unwrap();

        let events = drain(rx).await;
        match events.last().unwrap() {
            WorkerEvent::Finished { summary, .. } => {
                assert_eq!(summary.total_files, 0)
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }

        let store = SqliteStore::open(&config.database_path).unwrap();
        assert!(store.load_baseline().unwrap().is_empty());
    }

    #[test]
    fn notice_counts_modified_and_metadata_changes() {
        let mut record = FileRecord::new(
            FileMetadata {
                path: "/a".into(),
                hash: "new".into(),
                ..Default::default()
            },
            chrono::Utc::now(),
            "test",
        );
        record.status = FileStatus::Changed;
        record.previous_hash = "old".into();
        record.metadata_changed = true;
        record.permissions_changed = true;

        let outcome = ScanOutcome {
            summary: ScanSummary {
                total_files: 1,
                changed_count: 1,
                ..Default::default()
            },
            records: vec![record],
            signature_error_count: 1,
        };

        let notice = build_notice(&outcome);
        assert_eq!(notice.modified_count, 1);
        assert_eq!(notice.meta_changed_count, 1);
        assert_eq!(notice.permission_changed_count, 1);
        assert_eq!(notice.signature_error_count, 1);
    }
}
