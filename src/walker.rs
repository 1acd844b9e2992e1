//! Pagination walker: pages through a peer's history from the checkpoint,
//! hands each new media item to the downloader and advances the checkpoint
//! once a batch is fully processed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointError, CheckpointStore, Cursor};
use crate::client::{Item, PeerId};
use crate::download::{DedupTracker, DownloadOutcome, DownloadReport, Downloader};
use crate::retry::{self, BackoffConfig};
use crate::session::{SessionError, SessionManager};
use crate::state::{RunStats, StateDb};
use crate::systemd::SystemdNotifier;

#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub batch_size: u32,
    pub batch_delay_secs: u64,
    /// Cooldown between failed fetches of the same cursor.
    pub fetch_backoff: BackoffConfig,
    /// Items of one batch downloaded at the same time.
    pub concurrency: usize,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_secs: 3,
            fetch_backoff: BackoffConfig::constant(5),
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub batches: u64,
    pub downloaded: u64,
    pub failed: u64,
    /// Items skipped because this run already verified them.
    pub duplicates: u64,
    pub cursor: Cursor,
    /// History ran out, as opposed to a stop request.
    pub exhausted: bool,
}

impl WalkSummary {
    fn run_stats(&self, interrupted: bool) -> RunStats {
        RunStats {
            batches: self.batches,
            downloaded: self.downloaded,
            failed: self.failed,
            final_cursor: self.cursor.value(),
            interrupted,
        }
    }
}

/// The only ways a walk ends early. Everything else is retried or logged.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub struct Walker {
    session: Arc<SessionManager>,
    downloader: Arc<Downloader>,
    checkpoint: CheckpointStore,
    peer: PeerId,
    config: WalkConfig,
    shutdown: CancellationToken,
    dedup: DedupTracker,
    ledger: Option<Arc<dyn StateDb>>,
    notifier: SystemdNotifier,
    summary: WalkSummary,
}

impl Walker {
    pub fn new(
        session: Arc<SessionManager>,
        downloader: Arc<Downloader>,
        checkpoint: CheckpointStore,
        peer: PeerId,
        config: WalkConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            downloader,
            checkpoint,
            peer,
            config,
            shutdown,
            dedup: DedupTracker::new(),
            ledger: None,
            notifier: SystemdNotifier::new(false),
            summary: WalkSummary::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn StateDb>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub(crate) fn with_notifier(mut self, notifier: SystemdNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Walk the history and record the run in the ledger, if there is one.
    pub async fn run(&mut self) -> Result<WalkSummary, WalkError> {
        let run_id = match &self.ledger {
            Some(ledger) => match ledger.start_run().await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("Failed to record run start: {}", e);
                    None
                }
            },
            None => None,
        };

        let result = self.walk().await;

        if let (Some(ledger), Some(run_id)) = (&self.ledger, run_id) {
            let interrupted = result.is_err() || !self.summary.exhausted;
            if let Err(e) = ledger
                .complete_run(run_id, &self.summary.run_stats(interrupted))
                .await
            {
                tracing::warn!("Failed to record run completion: {}", e);
            }
        }

        result
    }

    async fn walk(&mut self) -> Result<WalkSummary, WalkError> {
        let mut cursor = self.checkpoint.load().await;
        self.summary.cursor = cursor;
        if cursor != Cursor::default() {
            tracing::info!(cursor = cursor.value(), "Resuming from checkpoint");
        }

        let mut fetch_failures: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!(cursor = cursor.value(), "Stop requested, leaving walk");
                break;
            }

            let lease = self.session.current().await;
            let batch = match lease
                .client
                .fetch_history(self.peer, cursor.value(), self.config.batch_size, 0)
                .await
            {
                Ok(batch) => {
                    fetch_failures = 0;
                    batch
                }
                Err(e) => {
                    tracing::warn!(cursor = cursor.value(), error = %e, "Failed to fetch batch");
                    if e.is_session_invalid() {
                        self.session.recover(lease.generation, &e).await?;
                    }
                    let delay = self.config.fetch_backoff.delay_for_retry(fetch_failures);
                    fetch_failures = fetch_failures.saturating_add(1);
                    if !retry::sleep_or_cancel(delay, &self.shutdown).await {
                        tracing::info!("Stop requested during fetch cooldown");
                        break;
                    }
                    continue;
                }
            };

            let Some(last_id) = batch.last().map(|item| item.id) else {
                tracing::info!(cursor = cursor.value(), "No more history");
                self.summary.exhausted = true;
                break;
            };

            self.summary.batches += 1;
            tracing::debug!(
                cursor = cursor.value(),
                items = batch.len(),
                "Processing batch {}",
                self.summary.batches
            );
            self.process_batch(&batch).await?;

            if self.shutdown.is_cancelled() {
                tracing::info!(
                    cursor = cursor.value(),
                    "Stop requested mid-batch, checkpoint not advanced"
                );
                break;
            }

            // Last item as returned; the source decides the order.
            cursor = Cursor::new(last_id);
            self.checkpoint.save(cursor).await?;
            self.summary.cursor = cursor;

            tracing::info!(
                cursor = cursor.value(),
                downloaded = self.summary.downloaded,
                failed = self.summary.failed,
                "Batch {} done",
                self.summary.batches
            );
            self.notifier.watchdog();
            self.notifier.status(&format!(
                "Batch {}, cursor {}, {} downloaded",
                self.summary.batches, cursor, self.summary.downloaded
            ));

            let delay = Duration::from_secs(self.config.batch_delay_secs);
            if !retry::sleep_or_cancel(delay, &self.shutdown).await {
                tracing::info!("Stop requested between batches");
                break;
            }
        }

        Ok(self.summary.clone())
    }

    /// Download every new media item of the batch. Returns once each one has
    /// a definitive outcome, or on the first fatal session error.
    async fn process_batch(&mut self, batch: &[Item]) -> Result<(), WalkError> {
        let mut in_batch = HashSet::new();
        let mut pending = Vec::new();
        for item in batch {
            if !item.has_media() {
                continue;
            }
            if self.dedup.seen(item.id) || !in_batch.insert(item.id) {
                tracing::debug!(item_id = item.id, "Already downloaded this run, skipping");
                self.summary.duplicates += 1;
                continue;
            }
            pending.push(item);
        }

        let downloader = Arc::clone(&self.downloader);
        let downloader = &downloader;
        let mut results = stream::iter(pending)
            .map(|item| async move { (item, downloader.download(item).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some((item, result)) = results.next().await {
            self.record(item, result?).await;
        }
        Ok(())
    }

    async fn record(&mut self, item: &Item, report: DownloadReport) {
        match report.outcome {
            DownloadOutcome::Verified(path) => {
                self.dedup.mark(item.id);
                self.summary.downloaded += 1;
                tracing::info!(item_id = item.id, "Downloaded {}", path.display());
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger
                        .record_downloaded(item.id, &path, item.expected_size(), report.attempts)
                        .await
                    {
                        tracing::warn!(item_id = item.id, "Failed to record download: {}", e);
                    }
                }
            }
            DownloadOutcome::Failed(_) if self.shutdown.is_cancelled() => {
                tracing::debug!(item_id = item.id, "Skipped, stop requested");
            }
            DownloadOutcome::Failed(reason) | DownloadOutcome::Exhausted(reason) => {
                self.summary.failed += 1;
                tracing::warn!(
                    item_id = item.id,
                    attempts = report.attempts,
                    "Item failed: {}",
                    reason
                );
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger
                        .record_failed(item.id, &reason, report.attempts)
                        .await
                    {
                        tracing::warn!(item_id = item.id, "Failed to record failure: {}", e);
                    }
                }
            }
        }
    }
}
