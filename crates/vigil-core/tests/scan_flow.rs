//! End-to-end scan scenarios against real files and a real database.
//!
//! Each test drives the full pipeline: Scanner discovers and fingerprints a
//! temp tree, the Reconciler classifies against the SQLite baseline, and
//! assertions check summaries, records and history rows.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};
use vigil_core::store::Store;
use vigil_core::{
    ExcludeRule, FileStatus, Reconciler, ScanConfig, Scanner, SqliteStore,
};

struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    config: ScanConfig,
    store: SqliteStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        let config = ScanConfig {
            database_path: dir.path().join("state.db"),
            monitored_directories: vec![root.to_string_lossy().into_owned()],
            ..Default::default()
        };
        let store = SqliteStore::open(&config.database_path).unwrap();
        Self {
            _dir: dir,
            root,
            config,
            store,
        }
    }

    fn scan(&self) -> vigil_core::ScanOutcome {
        let scanner = Scanner::new(&self.config);
        let new_state = scanner.collect();
        Reconciler::new(&self.store, "test-scan")
            .reconcile(new_state, scanner.roots(), None)
            .unwrap()
    }

    fn write(&self, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = self.root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}

fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[test]
fn first_scan_of_a_fresh_tree() {
    let fx = Fixture::new();
    fx.write("a.txt", b"hello");

    let outcome = fx.scan();
    assert_eq!(outcome.summary.total_files, 1);
    assert_eq!(outcome.summary.new_count, 1);
    assert_eq!(outcome.records[0].status, FileStatus::New);
    assert_eq!(outcome.records[0].metadata.hash, sha256_hex(b"hello"));
    assert!(outcome.records[0].previous_hash.is_empty());

    let history = fx.store.load_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_status, None);
    assert_eq!(history[0].new_status, FileStatus::New.code());
    assert_eq!(history[0].new_hash, sha256_hex(b"hello"));
}

#[test]
fn unchanged_second_scan_writes_nothing() {
    let fx = Fixture::new();
    fx.write("a.txt", b"hello");

    fx.scan();
    let history_before = fx.store.load_history(100).unwrap().len();
    let outcome = fx.scan();

    assert_eq!(outcome.summary.changed_count, 0);
    assert_eq!(outcome.summary.new_count, 0);
    assert_eq!(outcome.summary.deleted_count, 0);
    assert_eq!(outcome.summary.error_count, 0);
    assert_eq!(outcome.summary.overall_status(), FileStatus::Ok);
    assert_eq!(fx.store.load_history(100).unwrap().len(), history_before);
}

#[test]
fn content_change_is_detected_with_both_hashes() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"hello");

    fx.scan();
    fs::write(&path, b"world").unwrap();
    let outcome = fx.scan();

    assert_eq!(outcome.summary.changed_count, 1);
    assert_eq!(outcome.records[0].status, FileStatus::Changed);

    let history = fx.store.load_history(1).unwrap();
    assert_eq!(history[0].old_status, Some(FileStatus::Ok.code()));
    assert_eq!(history[0].new_status, FileStatus::Changed.code());
    assert_eq!(history[0].old_hash, sha256_hex(b"hello"));
    assert_eq!(history[0].new_hash, sha256_hex(b"world"));
}

#[test]
fn deletion_keeps_the_record_and_its_fingerprint() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"hello");

    fx.scan();
    fs::remove_file(&path).unwrap();
    let outcome = fx.scan();

    assert_eq!(outcome.summary.deleted_count, 1);
    assert_eq!(outcome.summary.total_files, 0);

    let record = fx
        .store
        .load_record(&path.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(record.status, FileStatus::Deleted);
    assert_eq!(record.metadata.hash, sha256_hex(b"hello"));

    let history = fx.store.load_history(1).unwrap();
    assert_eq!(history[0].new_status, FileStatus::Deleted.code());
    assert_eq!(history[0].new_hash, "");

    // A third scan has nothing further to say about it.
    let outcome = fx.scan();
    assert_eq!(outcome.summary.deleted_count, 0);
    assert_eq!(fx.store.load_history(100).unwrap().len(), 2);
}

#[test]
fn mtime_change_without_content_change_is_changed() {
    let fx = Fixture::new();
    let path = fx.write("a.txt", b"same");

    fx.scan();
    let metadata = fs::metadata(&path).unwrap();
    let bumped = filetime_from_secs(&metadata, 3600);
    filetime_set(&path, bumped);
    let outcome = fx.scan();

    assert_eq!(outcome.summary.changed_count, 1);
    let record = &outcome.records[0];
    assert_eq!(record.status, FileStatus::Changed);
    assert!(record.mtime_changed);
    assert_eq!(record.metadata.hash, record.previous_hash);

    let history = fx.store.load_history(100).unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn tampered_baseline_row_is_reported_changed() {
    let fx = Fixture::new();
    fx.write("a.txt", b"steady");

    let mut config = fx.config.clone();
    config.hmac_key = "integration-key".into();
    let mut store = SqliteStore::open(&config.database_path).unwrap();
    store.set_hmac_key(config.hmac_key_bytes());

    let scanner = Scanner::new(&config);
    let reconciler = Reconciler::new(&store, "test-scan");
    reconciler
        .reconcile(scanner.collect(), scanner.roots(), None)
        .unwrap();

    // Corrupt the stored signature directly, as an attacker editing the
    // database would.
    {
        let conn = rusqlite::Connection::open(&config.database_path).unwrap();
        conn.execute("UPDATE files SET signature = 'deadbeef'", [])
            .unwrap();
    }

    let outcome = reconciler
        .reconcile(scanner.collect(), scanner.roots(), None)
        .unwrap();
    assert_eq!(outcome.summary.changed_count, 1);
    assert_eq!(outcome.signature_error_count, 1);
    assert_eq!(outcome.records[0].status, FileStatus::Changed);

    // The rewrite restored a valid signature, so the next scan is clean.
    let outcome = reconciler
        .reconcile(scanner.collect(), scanner.roots(), None)
        .unwrap();
    assert_eq!(outcome.summary.changed_count, 0);
}

#[test]
fn empty_roots_produce_an_empty_summary() {
    let dir = tempdir().unwrap();
    let config = ScanConfig {
        database_path: dir.path().join("state.db"),
        monitored_directories: Vec::new(),
        ..Default::default()
    };
    let store = SqliteStore::open(&config.database_path).unwrap();

    let scanner = Scanner::new(&config);
    let outcome = Reconciler::new(&store, "test-scan")
        .reconcile(scanner.collect(), scanner.roots(), None)
        .unwrap();

    assert_eq!(outcome.summary.total_files, 0);
    assert_eq!(outcome.summary.overall_status(), FileStatus::Ok);
    assert!(store.load_history(10).unwrap().is_empty());
}

#[test]
fn excluded_path_still_on_disk_keeps_previous_status() {
    let mut fx = Fixture::new();
    let kept = fx.write("kept.txt", b"kept");

    fx.scan();
    fx.config.exclude_rules = vec![ExcludeRule::glob("kept.txt")];
    let outcome = fx.scan();

    // Not scanned, not deleted: the file still exists on disk.
    assert_eq!(outcome.summary.total_files, 0);
    assert_eq!(outcome.summary.deleted_count, 0);
    let record = fx
        .store
        .load_record(&kept.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(record.status, FileStatus::New);
}

#[test]
fn baseline_survives_round_trip_through_store() {
    let fx = Fixture::new();
    fx.write("one.txt", b"1");
    fx.write("sub/two.txt", b"22");

    let outcome = fx.scan();
    let reloaded = fx.store.load_baseline().unwrap();
    assert_eq!(reloaded.len(), outcome.records.len());
    for record in &reloaded {
        let original = outcome
            .records
            .iter()
            .find(|r| r.metadata.path == record.metadata.path)
            .unwrap();
        assert_eq!(record.metadata.hash, original.metadata.hash);
        assert_eq!(record.metadata.size, original.metadata.size);
        assert_eq!(record.metadata.mtime, original.metadata.mtime);
        assert_eq!(record.status, original.status);
        assert!(record.signature_valid);
    }
}

#[test]
fn clear_all_resets_the_baseline() {
    let fx = Fixture::new();
    fx.write("a.txt", b"data");
    fx.scan();
    assert_eq!(fx.store.load_baseline().unwrap().len(), 1);

    fx.store.clear_all().unwrap();
    assert!(fx.store.load_baseline().unwrap().is_empty());

    // Everything is New again afterwards.
    let outcome = fx.scan();
    assert_eq!(outcome.summary.new_count, 1);
}

fn filetime_from_secs(metadata: &fs::Metadata, bump: u64) -> std::time::SystemTime {
    metadata.modified().unwrap() + std::time::Duration::from_secs(bump)
}

fn filetime_set(path: &Path, to: std::time::SystemTime) {
    let file = fs::File::options().append(true).open(path).unwrap();
    let times = fs::FileTimes::new().set_modified(to);
    file.set_times(times).unwrap();
}
