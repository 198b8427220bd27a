//! Directory traversal.
//!
//! Walks the configured roots and yields one metadata record per accepted
//! regular file. Policies handled here:
//! - recursion flag and depth cap (the root is depth 0)
//! - symlink handling: skipped entirely, or followed with loop avoidance
//!   through a set of canonicalized directory paths
//! - exclusion rules, evaluated before any metadata is read; an excluded
//!   directory prunes its whole subtree
//! - hard-linked duplicates: a (device, inode) pair already seen this scan
//!   is skipped, so shared content is fingerprinted once
//! - unreadable directories are logged and skipped, never fatal
//!
//! The scanner never touches the store.

use crate::config::ScanConfig;
use crate::exclude::ExcludeSet;
use crate::hasher::{self, HashError};
use crate::models::FileMetadata;
use crate::probe;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub struct Scanner {
    roots: Vec<PathBuf>,
    excludes: ExcludeSet,
    recursive: bool,
    follow_symlinks: bool,
    max_depth: i32,
}

impl Scanner {
    pub fn new(config: &ScanConfig) -> Self {
        let roots = config
            .monitored_directories
            .iter()
            .map(|dir| absolute(Path::new(dir)))
            .collect();
        Self {
            roots,
            excludes: ExcludeSet::new(&config.exclude_rules),
            recursive: config.recursive,
            follow_symlinks: config.follow_symlinks,
            max_depth: config.max_depth,
        }
    }

    /// The absolutized scan roots, in configuration order.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Walk all roots and return the accepted regular files in traversal
    /// order. Roots that are missing or not directories are skipped.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut seen_inodes: HashSet<(u64, u64)> = HashSet::new();
        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "scan root missing or not a directory, skipped");
                continue;
            }
            self.walk_root(root, &mut files, &mut seen_inodes);
        }
        files
    }

    fn walk_root(
        &self,
        root: &Path,
        files: &mut Vec<PathBuf>,
        seen_inodes: &mut HashSet<(u64, u64)>,
    ) {
        // Name order keeps traversal deterministic, and with it which path
        // of a hard-link group gets accepted.
        let mut walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        if !self.recursive {
            walker = walker.max_depth(1);
        } else if self.max_depth >= 0 {
            // A file at depth N sits N+1 levels below the root in walkdir
            // terms.
            walker = walker.max_depth(self.max_depth as usize + 1);
        }

        let mut visited: HashSet<PathBuf> = HashSet::new();
        let iter = walker
            .into_iter()
            .filter_entry(|entry| self.should_enter(entry, &mut visited));

        for entry in iter {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if inode_already_seen(&entry, seen_inodes) {
                        debug!(path = %entry.path().display(), "hard link to scanned content, skipped");
                        continue;
                    }
                    files.push(entry.into_path());
                }
                // Directories and special files (sockets, pipes, devices).
                Ok(_) => {}
                Err(err) => {
                    warn!(%err, "directory entry skipped");
                }
            }
        }
    }

    /// Entry filter: exclusion, symlink policy, and directory loop
    /// avoidance. Returning false for a directory prunes its subtree.
    fn should_enter(&self, entry: &DirEntry, visited: &mut HashSet<PathBuf>) -> bool {
        let path = entry.path();

        if self.excludes.is_excluded(path) {
            debug!(path = %path.display(), "excluded");
            return false;
        }

        if !self.follow_symlinks && entry.path_is_symlink() {
            return false;
        }

        if entry.file_type().is_dir() {
            // Canonical form guards against both symlink cycles and
            // hard-linked directory loops.
            match path.canonicalize() {
                Ok(canonical) => {
                    if !visited.insert(canonical) {
                        debug!(path = %path.display(), "directory already visited, skipped");
                        return false;
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot canonicalize directory, skipped");
                    return false;
                }
            }
        }

        true
    }

    /// Probe and fingerprint one file. Failures never propagate; they leave
    /// the hash empty and fill `error_reason` instead.
    pub fn examine(&self, path: &Path) -> FileMetadata {
        let mut meta = match probe::probe(path, self.follow_symlinks) {
            Ok(meta) => meta,
            Err(err) => {
                return FileMetadata {
                    path: path.to_string_lossy().into_owned(),
                    error_reason: Some(HashError::from(err).to_string()),
                    ..Default::default()
                }
            }
        };

        match hasher::compute(path) {
            Ok(hash) => meta.hash = hash,
            Err(err) => {
                meta.hash = String::new();
                meta.error_reason = Some(err.to_string());
            }
        }
        meta
    }

    /// Convenience for synchronous callers: discover + examine.
    pub fn collect(&self) -> Vec<FileMetadata> {
        self.discover()
            .iter()
            .map(|path| self.examine(path))
            .collect()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Whether this file's (device, inode) pair was already accepted during the
/// current scan. Inode zero is never deduplicated.
#[cfg(unix)]
fn inode_already_seen(entry: &DirEntry, seen: &mut HashSet<(u64, u64)>) -> bool {
    use std::os::unix::fs::MetadataExt;
    match entry.metadata() {
        Ok(meta) => {
            let key = (meta.dev(), meta.ino());
            key.1 != 0 && !seen.insert(key)
        }
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn inode_already_seen(_entry: &DirEntry, _seen: &mut HashSet<(u64, u64)>) -> bool {
    false
}
