//! Scan configuration.
//!
//! The configuration is an explicit struct handed to workers at
//! construction; nothing reads process-wide state. On disk it is a JSON
//! document whose key names are stable across versions.

use crate::error::{Error, Result};
use crate::exclude::ExcludeRule;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "vigil";

/// Options for one scan plus the monitoring settings around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// Location of the SQLite database file.
    pub database_path: PathBuf,

    /// Ordered list of scan roots.
    pub monitored_directories: Vec<String>,

    /// Exclusion rules, serialized as `path:<pattern>` / `glob:<pattern>`
    /// strings.
    #[serde(deserialize_with = "lenient_rules")]
    pub exclude_rules: Vec<ExcludeRule>,

    /// Seconds between scheduled scans. Zero disables scheduling.
    pub interval_seconds: u64,

    pub recursive: bool,

    pub follow_symlinks: bool,

    /// Directory recursion cap; the root is depth 0. Negative disables the
    /// cap.
    pub max_depth: i32,

    pub monitoring_enabled: bool,

    /// Key for the baseline row signatures. Empty disables signing and
    /// implicitly trusts existing rows.
    pub hmac_key: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            monitored_directories: Vec::new(),
            exclude_rules: Vec::new(),
            interval_seconds: 300,
            recursive: true,
            follow_symlinks: false,
            max_depth: 20,
            monitoring_enabled: false,
            hmac_key: String::new(),
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file, or start from defaults when the file does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn hmac_key_bytes(&self) -> Vec<u8> {
        self.hmac_key.as_bytes().to_vec()
    }

    /// Reject configurations a scan cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("databasePath must not be empty".into()));
        }
        Ok(())
    }
}

/// Unknown rule prefixes are dropped rather than failing the whole config,
/// matching the historical settings behavior.
fn lenient_rules<'de, D>(deserializer: D) -> std::result::Result<Vec<ExcludeRule>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    Ok(raw.iter().filter_map(|s| ExcludeRule::parse(s)).collect())
}

/// Default configuration file location in the platform user-config
/// directory.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().join("config.json"))
        .unwrap_or_else(|| PathBuf::from("vigil-config.json"))
}

/// Default database location in the platform user-data directory.
pub fn default_database_path() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("vigil.db"))
        .unwrap_or_else(|| PathBuf::from("vigil.db"))
}
