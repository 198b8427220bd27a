//! Exclusion rules for the scanner.
//!
//! Two rule kinds:
//! - `Path`: matches a lexically normalized path, either exactly or as a
//!   directory prefix. Excluding a directory prunes its whole subtree.
//! - `Glob`: matched against the entry's basename only.
//!
//! Evaluation is "any rule matches"; empty patterns are ignored.

use glob::Pattern;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeKind {
    Path,
    Glob,
}

/// One exclusion rule. The configuration wire format is
/// `"path:<pattern>"` or `"glob:<pattern>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeRule {
    pub kind: ExcludeKind,
    pub pattern: String,
}

impl ExcludeRule {
    pub fn path(pattern: impl Into<String>) -> Self {
        Self {
            kind: ExcludeKind::Path,
            pattern: pattern.into(),
        }
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            kind: ExcludeKind::Glob,
            pattern: pattern.into(),
        }
    }

    /// Parse the wire format. Entries with an unknown prefix are dropped by
    /// callers, matching how the settings layer has always treated them.
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(pattern) = s.strip_prefix("path:") {
            return Some(Self::path(pattern));
        }
        if let Some(pattern) = s.strip_prefix("glob:") {
            return Some(Self::glob(pattern));
        }
        None
    }
}

impl fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ExcludeKind::Path => "path",
            ExcludeKind::Glob => "glob",
        };
        write!(f, "{prefix}:{}", self.pattern)
    }
}

impl Serialize for ExcludeRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ExcludeRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| D::Error::custom(format!("invalid exclude rule: {s}")))
    }
}

/// Compiled rule set, built once per scan.
#[derive(Debug, Default)]
pub struct ExcludeSet {
    path_prefixes: Vec<String>,
    globs: Vec<Pattern>,
}

impl ExcludeSet {
    pub fn new(rules: &[ExcludeRule]) -> Self {
        let mut set = Self::default();
        for rule in rules {
            if rule.pattern.is_empty() {
                continue;
            }
            match rule.kind {
                ExcludeKind::Path => {
                    let normalized = normalize(Path::new(&rule.pattern));
                    set.path_prefixes
                        .push(normalized.to_string_lossy().into_owned());
                }
                ExcludeKind::Glob => match Pattern::new(&rule.pattern) {
                    Ok(p) => set.globs.push(p),
                    Err(err) => warn!(pattern = %rule.pattern, %err, "invalid glob pattern, ignored"),
                },
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.path_prefixes.is_empty() && self.globs.is_empty()
    }

    /// Whether `path` is excluded. Path rules compare the normalized path;
    /// glob rules see only the basename.
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.is_empty() {
            return false;
        }

        let normalized = normalize(path);
        let normalized = normalized.to_string_lossy();
        for prefix in &self.path_prefixes {
            if normalized.as_ref() == prefix.as_str() {
                return true;
            }
            if normalized.starts_with(prefix.as_str())
                && normalized[prefix.len()..].starts_with(MAIN_SEPARATOR)
            {
                return true;
            }
        }

        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy();
            if self.globs.iter().any(|p| p.matches(&name)) {
                return true;
            }
        }

        false
    }
}

/// Lexical path normalization: drops `.` components and resolves `..`
/// without touching the filesystem. Both rule patterns and candidate paths
/// go through this so the comparison is symmetric.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !matches!(out.components().next_back(), Some(Component::RootDir)) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let rule = ExcludeRule::parse("path:/var/log").unwrap();
        assert_eq!(rule.kind, ExcludeKind::Path);
        assert_eq!(rule.pattern, "/var/log");

        let rule = ExcludeRule::parse("glob:*.tmp").unwrap();
        assert_eq!(rule.kind, ExcludeKind::Glob);
        assert_eq!(rule.to_string(), "glob:*.tmp");

        assert!(ExcludeRule::parse("regex:.*").is_none());
    }

    #[test]
    fn path_rule_matches_exact_and_subtree() {
        let set = ExcludeSet::new(&[ExcludeRule::path("/data/cache")]);
        assert!(set.is_excluded(Path::new("/data/cache")));
        assert!(set.is_excluded(Path::new("/data/cache/a/b.txt")));
        assert!(!set.is_excluded(Path::new("/data/cachefile")));
        assert!(!set.is_excluded(Path::new("/data")));
    }

    #[test]
    fn path_rule_is_normalized_before_comparison() {
        let set = ExcludeSet::new(&[ExcludeRule::path("/data/./cache/../cache")]);
        assert!(set.is_excluded(Path::new("/data/cache/x")));
        assert!(set.is_excluded(Path::new("/data/other/../cache/x")));
    }

    #[test]
    fn glob_rule_matches_basename_only() {
        let set = ExcludeSet::new(&[
            ExcludeRule::glob("*.log"),
            ExcludeRule::glob("core*"),
            ExcludeRule::glob("*swap*"),
            ExcludeRule::glob("exact.txt"),
        ]);
        assert!(set.is_excluded(Path::new("/a/b/server.log")));
        assert!(set.is_excluded(Path::new("/a/core.1234")));
        assert!(set.is_excluded(Path::new("/a/.swapfile")));
        assert!(set.is_excluded(Path::new("/a/exact.txt")));
        assert!(!set.is_excluded(Path::new("/a/log/exact.json")));
    }

    #[test]
    fn empty_patterns_are_ignored() {
        let set = ExcludeSet::new(&[ExcludeRule::glob(""), ExcludeRule::path("")]);
        assert!(set.is_empty());
        assert!(!set.is_excluded(Path::new("/anything")));
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("a/./b")), PathBuf::from("a/b"));
    }
}
