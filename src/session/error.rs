use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientError;

/// Failures of the session layer. Both are fatal: there is no recovery
/// layer above this one.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session recovery failed: {0}")]
    RecoveryFailed(#[source] ClientError),

    #[error("Failed to remove session file {path}: {source}")]
    RemoveSession {
        path: PathBuf,
        source: std::io::Error,
    },
}
