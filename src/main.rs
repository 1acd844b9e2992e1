//! chatpd-rs: resumable media downloader for chat histories.
//!
//! Pages backwards through a conversation's history in fixed-size batches,
//! downloads every media attachment with size verification and bounded
//! retries, and persists a cursor after each fully processed batch so an
//! interrupted run resumes exactly where it stopped. A revoked or expired
//! session is rebuilt in place without losing progress.

#![warn(clippy::all)]

mod checkpoint;
mod cli;
mod client;
mod config;
mod download;
pub mod retry;
mod session;
mod shutdown;
mod state;
mod systemd;
mod types;
mod walker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use checkpoint::{CheckpointStore, InstanceLock};
use cli::Command;
use client::http::HttpBootstrap;
use client::{ClientError, PeerId, PeerTarget, SessionBootstrap};
use config::{Config, StatePaths};
use download::Downloader;
use session::SessionManager;
use state::StateDb;
use systemd::SystemdNotifier;
use walker::Walker;

/// Resolve the configured target, rebuilding the session once if it turns
/// out to be invalid.
async fn resolve_target(
    session: &SessionManager,
    target: &PeerTarget,
) -> anyhow::Result<PeerId> {
    let lease = session.current().await;
    match lease.client.resolve_peer(target).await {
        Ok(peer) => Ok(peer),
        Err(e) if e.is_session_invalid() => {
            let lease = session.recover(lease.generation, &e).await?;
            Ok(lease
                .client
                .resolve_peer(target)
                .await
                .with_context(|| format!("Failed to resolve {}", target))?)
        }
        Err(e @ ClientError::UnsupportedPeer(_)) => {
            Err(anyhow::Error::new(e).context(format!("Cannot download from {}", target)))
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to resolve {}", target))),
    }
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_args(args)?;
    tracing::debug!(?config, "Loaded configuration");
    tracing::info!(
        target = %config.target,
        concurrency = config.walk.concurrency,
        "Starting chatpd-rs"
    );

    let lock = InstanceLock::acquire(&config.state.lock)?;
    tracing::debug!("Holding {}", lock.path().display());
    let shutdown_token =
        shutdown::install_signal_handler().context("Failed to install signal handlers")?;
    let notifier = SystemdNotifier::new(config.notify_systemd);

    let bootstrap: Arc<dyn SessionBootstrap> = Arc::new(HttpBootstrap::new(
        &config.gateway_url,
        config.api_id,
        &config.api_hash,
        config.timeout_secs,
    ));
    let session = Arc::new(
        SessionManager::start(bootstrap, config.session_file().to_path_buf())
            .await
            .context("Failed to establish a session")?,
    );

    let peer = resolve_target(&session, &config.target).await?;
    tracing::info!(peer = %peer, "Resolved {}", config.target);

    let ledger: Option<Arc<dyn StateDb>> =
        match state::SqliteStateDb::open(&config.state.ledger).await {
            Ok(db) => {
                tracing::debug!("Ledger at {}", config.state.ledger.display());
                Some(Arc::new(db))
            }
            Err(e) => {
                tracing::warn!("Ledger unavailable, continuing without it: {}", e);
                None
            }
        };

    let downloader = Arc::new(Downloader::new(
        session.clone(),
        config.directory.clone(),
        config.retry,
        shutdown_token.clone(),
    ));
    let mut walker = Walker::new(
        session.clone(),
        downloader,
        CheckpointStore::new(config.state.checkpoint.clone()),
        peer,
        config.walk.clone(),
        shutdown_token.clone(),
    )
    .with_notifier(notifier);
    if let Some(ledger) = ledger {
        walker = walker.with_ledger(ledger);
    }

    notifier.ready();
    let started = Instant::now();
    let result = walker.run().await;
    notifier.stopping();

    let summary = result?;
    tracing::info!("── Summary ──");
    tracing::info!(
        "  {} downloaded, {} failed, {} duplicates skipped",
        summary.downloaded,
        summary.failed,
        summary.duplicates
    );
    tracing::info!("  {} batches, checkpoint at {}", summary.batches, summary.cursor);
    tracing::info!("  {} session recoveries", session.recoveries());
    tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
    if summary.exhausted {
        tracing::info!("History exhausted");
    } else {
        tracing::info!("Stopped before the end of history, next run resumes from the checkpoint");
    }

    Ok(())
}

async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let (target, paths) = StatePaths::from_args(&args.state)?;

    let checkpoint = CheckpointStore::new(paths.checkpoint.clone());
    println!("Target: {}", target);
    if checkpoint.path().exists() {
        println!("Checkpoint: last_id = {}", checkpoint.load().await);
    } else {
        println!("Checkpoint: none (next sync starts from the newest message)");
    }
    println!();

    if !paths.ledger.exists() {
        println!("No ledger found at {}", paths.ledger.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let db = state::SqliteStateDb::open(&paths.ledger).await?;
    let summary = db.get_summary().await?;

    println!("Ledger: {}", paths.ledger.display());
    println!();
    println!("Items:");
    println!("  Total:      {}", summary.total_items);
    println!("  Downloaded: {}", summary.downloaded);
    println!("  Failed:     {}", summary.failed);
    println!();
    println!("Runs: {}", summary.runs);
    if let Some(started) = &summary.last_run_started {
        println!(
            "Last run started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_run_completed {
        println!(
            "Last run completed: {}{}",
            completed.format("%Y-%m-%d %H:%M:%S UTC"),
            if summary.last_run_interrupted {
                " (interrupted)"
            } else {
                ""
            }
        );
    }

    if args.failed && summary.failed > 0 {
        println!();
        println!("Failed items:");
        for item in db.get_failed().await? {
            println!(
                "  {} ({} attempts, last tried {}) - {}",
                item.id,
                item.attempts,
                item.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                item.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let (_, paths) = StatePaths::from_args(&args.state)?;

    if !paths.checkpoint.exists() && !paths.ledger.exists() {
        println!("No state found for this target in {}", paths.dir.display());
        return Ok(());
    }

    // Refuse while a sync holds the target
    let _lock = InstanceLock::acquire(&paths.lock)?;

    if !args.yes {
        println!("This will delete:");
        println!("  {}", paths.checkpoint.display());
        println!("  {}", paths.ledger.display());
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if CheckpointStore::new(paths.checkpoint.clone()).clear().await? {
        println!("Checkpoint deleted.");
    }

    if paths.ledger.exists() {
        std::fs::remove_file(&paths.ledger)
            .with_context(|| format!("Failed to delete {}", paths.ledger.display()))?;
        println!("Ledger deleted.");
    }
    let _ = std::fs::remove_file(paths.ledger.with_extension("db-wal"));
    let _ = std::fs::remove_file(paths.ledger.with_extension("db-shm"));

    Ok(())
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}
