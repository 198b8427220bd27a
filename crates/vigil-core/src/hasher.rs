//! Streaming SHA-256 content fingerprinting.
//!
//! Files are read in fixed-size chunks so memory stays bounded regardless of
//! file size. Failures map to canonical reasons that end up in the record's
//! `error_reason` field.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Chunk size for streaming reads (1 MiB).
const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Why a fingerprint could not be acquired. The display strings are
/// canonical; UIs map them to localized text.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("insufficient permissions")]
    PermissionDenied,

    #[error("file no longer exists")]
    NotFound,

    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for HashError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::NotFound => Self::NotFound,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Compute the lowercase hex SHA-256 digest of a file's content.
pub fn compute(path: &Path) -> Result<String, HashError> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
