//! vigil-core: scan-and-reconcile engine for a file integrity monitor.
//!
//! The engine periodically walks a configured set of directories, computes
//! a SHA-256 fingerprint and filesystem metadata for every regular file,
//! compares the result against the durable SQLite baseline, classifies
//! each file (Ok / Changed / New / Deleted / Error), records transitions in
//! an append-only history, and hands a structured summary to notification
//! sinks.
//!
//! # Security properties
//!
//! Every baseline row carries an HMAC-SHA-256 signature over its canonical
//! payload. An attacker who modifies a file and then "restores" the
//! baseline row would also have to forge the HMAC; rows that fail
//! verification force the file to Changed on the next scan. This does not
//! defend against an attacker who also holds the key.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──▶ Worker ──▶ Scanner ──▶ Hasher + Probe
//!                 │                        │
//!                 ▼                        ▼
//!             Reconciler ◀── baseline ── Store (SQLite)
//!                 │
//!                 ▼
//!             Notifier sinks
//! ```
//!
//! Each worker owns its own store handle; the database file is the only
//! shared mutable resource and SQLite's locking orders commits.

pub mod config;
pub mod error;
pub mod exclude;
pub mod hasher;
pub mod models;
pub mod notify;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::ScanConfig;
pub use error::{Error, Result};
pub use exclude::{ExcludeKind, ExcludeRule};
pub use models::{FileMetadata, FileRecord, FileStatus, HistoryEvent, ScanSummary};
pub use notify::{NotificationSink, Notifier, NotifySummary};
pub use reconcile::{Reconciler, ScanOutcome};
pub use scanner::Scanner;
pub use scheduler::{spawn_monitor_loop, MonitorHandle};
pub use store::{SqliteStore, Store, StoreError};
pub use worker::{spawn_scan, ScanWorker, WorkerEvent};
