//! Verified downloader: turns one history item into a file on disk whose
//! size matches what the source announced, or into a definitive failure.
//!
//! Each attempt takes a fresh session lease, so a recovery performed by
//! another caller is picked up on the next attempt without coordination.

pub mod dedup;
pub mod error;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::Item;
use crate::retry::{self, RetryConfig};
use crate::session::{SessionError, SessionLease, SessionManager};

pub use self::dedup::DedupTracker;
pub use self::error::DownloadError;

/// Final result for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File present with the expected size.
    Verified(PathBuf),
    /// Not worth retrying: no media, unusable destination, stop requested.
    Failed(String),
    /// Attempt budget consumed; carries the last error.
    Exhausted(String),
}

impl DownloadOutcome {
    #[cfg(test)]
    pub fn is_verified(&self) -> bool {
        matches!(self, DownloadOutcome::Verified(_))
    }
}

/// Outcome plus the number of transfer attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub outcome: DownloadOutcome,
    pub attempts: u32,
}

const STOP_REQUESTED: &str = "stop requested";

pub struct Downloader {
    session: Arc<SessionManager>,
    directory: PathBuf,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl Downloader {
    pub fn new(
        session: Arc<SessionManager>,
        directory: PathBuf,
        retry: RetryConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            directory,
            retry,
            shutdown,
        }
    }

    #[cfg(test)]
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    /// Download and verify `item`.
    ///
    /// Only a failed session recovery is returned as an error; every other
    /// failure ends up in the report.
    pub async fn download(&self, item: &Item) -> Result<DownloadReport, SessionError> {
        if !item.has_media() {
            return Ok(report(DownloadOutcome::Failed("item has no media".into()), 0));
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.directory).await {
            tracing::error!(
                item_id = item.id,
                "Cannot create {}: {}",
                self.directory.display(),
                e
            );
            return Ok(report(
                DownloadOutcome::Failed(format!(
                    "cannot create {}: {}",
                    self.directory.display(),
                    e
                )),
                0,
            ));
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if self.shutdown.is_cancelled() {
                return Ok(report(DownloadOutcome::Failed(STOP_REQUESTED.into()), attempts));
            }
            attempts = attempt;

            let lease = self.session.current().await;
            tracing::debug!(
                item_id = item.id,
                attempt,
                size_bytes = ?item.expected_size(),
                "downloading"
            );
            match self.attempt(&lease, item).await {
                Ok(path) => {
                    tracing::debug!(item_id = item.id, attempt, "Downloaded {}", path.display());
                    return Ok(report(DownloadOutcome::Verified(path), attempts));
                }
                Err(DownloadError::Client(e)) if e.is_session_invalid() => {
                    tracing::warn!(item_id = item.id, attempt, "{}, recovering session", e);
                    last_error = e.to_string();
                    self.session.recover(lease.generation, &e).await?;
                }
                Err(e) if e.is_cancelled() => {
                    tracing::info!(item_id = item.id, attempt, "Transfer cancelled, retrying");
                    last_error = e.to_string();
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = item.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Download attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.retry.backoff.delay_for_retry(attempt - 1);
                if !retry::sleep_or_cancel(delay, &self.shutdown).await {
                    return Ok(report(DownloadOutcome::Failed(STOP_REQUESTED.into()), attempts));
                }
            }
        }

        tracing::error!(
            item_id = item.id,
            attempts,
            "Giving up after {} attempts: {}",
            attempts,
            last_error
        );
        Ok(report(DownloadOutcome::Exhausted(last_error), attempts))
    }

    /// One transfer plus verification. A file that fails verification is
    /// removed before returning.
    async fn attempt(&self, lease: &SessionLease, item: &Item) -> Result<PathBuf, DownloadError> {
        let path = lease
            .client
            .transfer_media(item, &self.directory)
            .await?
            .ok_or(DownloadError::NoFile { id: item.id })?;

        let actual = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::NoFile { id: item.id });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(expected) = item.expected_size() {
            if actual != expected {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Could not remove {}: {}", path.display(), e);
                }
                return Err(DownloadError::SizeMismatch {
                    path,
                    expected,
                    actual,
                });
            }
        }
        Ok(path)
    }
}

fn report(outcome: DownloadOutcome, attempts: u32) -> DownloadReport {
    DownloadReport { outcome, attempts }
}
