use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientError;

/// Why a single transfer attempt did not produce a verified file.
///
/// Every variant is retryable within the attempt budget; the caller only
/// needs to know whether the session must be rebuilt first.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Transfer incomplete: no file produced for item {id}")]
    NoFile { id: i64 },

    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Client(e) if e.is_cancelled())
    }
}
