use clap::{Args, Parser, Subcommand};

use crate::types::{BackoffPolicy, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "chatpd-rs",
    version,
    about = "Download media from a chat history, resuming where the last run stopped"
)]
pub struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk the target's history and download every media item
    Sync(SyncArgs),

    /// Show checkpoint and ledger for a target
    Status(StatusArgs),

    /// Delete checkpoint and ledger for a target
    ResetState(ResetStateArgs),
}

/// Which target's state to operate on.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Chat to download from: @username, invite link or numeric id
    #[arg(short = 't', long, env = "CHATPD_TARGET")]
    pub target: String,

    /// Directory for checkpoint, ledger, lock and session files
    #[arg(long, default_value = "~/.chatpd-rs")]
    pub state_dir: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Application id issued by the service
    #[arg(long, env = "CHATPD_API_ID")]
    pub api_id: i32,

    /// Application hash issued by the service.
    /// Prefer the CHATPD_API_HASH environment variable: arguments are visible
    /// in process listings.
    #[arg(long, env = "CHATPD_API_HASH")]
    pub api_hash: String,

    /// Base URL of the HTTP gateway
    #[arg(long, env = "CHATPD_GATEWAY_URL")]
    pub gateway_url: String,

    /// Local directory for downloads
    #[arg(short = 'd', long, default_value = "download")]
    pub directory: String,

    /// Session file (default: <state-dir>/session.json)
    #[arg(long)]
    pub session_file: Option<String>,

    /// Items requested per history page
    #[arg(long, default_value_t = 50)]
    pub batch_size: u32,

    /// Seconds to wait between pages
    #[arg(long, default_value_t = 3)]
    pub batch_delay: u64,

    /// Seconds to wait before fetching a page again after an error
    #[arg(long, default_value_t = 5)]
    pub fetch_retry_delay: u64,

    /// Transfer attempts per item before giving up
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Seconds to wait between transfer attempts
    #[arg(long, default_value_t = 2)]
    pub attempt_delay: u64,

    /// How delays grow with repeated failures
    #[arg(long, value_enum, default_value = "constant")]
    pub backoff: BackoffPolicy,

    /// Upper bound in seconds for exponential backoff
    #[arg(long, default_value_t = 60)]
    pub max_delay: u64,

    /// Items of a page downloaded in parallel
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Connect and idle-read timeout in seconds for gateway requests
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Send sd_notify readiness and status messages
    #[arg(long)]
    pub notify_systemd: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// List items that failed to download
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 8] = [
        "chatpd-rs",
        "sync",
        "--target",
        "@channel",
        "--api-id",
        "12345",
        "--api-hash",
        "0123456789abcdef",
    ];

    fn parse_sync(extra: &[&str]) -> SyncArgs {
        let args: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .chain(["--gateway-url", "http://localhost:8080"])
            .chain(extra.iter().copied())
            .collect();
        match Cli::try_parse_from(args).unwrap().command {
            Command::Sync(args) => args,
            other => panic!("expected sync, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_defaults() {
        let args = parse_sync(&[]);
        assert_eq!(args.state.target, "@channel");
        assert_eq!(args.state.state_dir, "~/.chatpd-rs");
        assert_eq!(args.directory, "download");
        assert_eq!(args.batch_size, 50);
        assert_eq!(args.batch_delay, 3);
        assert_eq!(args.fetch_retry_delay, 5);
        assert_eq!(args.max_attempts, 3);
        assert_eq!(args.attempt_delay, 2);
        assert_eq!(args.backoff, BackoffPolicy::Constant);
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.timeout, 30);
        assert!(!args.notify_systemd);
        assert!(args.session_file.is_none());
    }

    #[test]
    fn test_sync_overrides() {
        let args = parse_sync(&[
            "--backoff",
            "exponential",
            "--max-delay",
            "120",
            "--concurrency",
            "4",
            "--batch-size",
            "100",
        ]);
        assert_eq!(args.backoff, BackoffPolicy::Exponential);
        assert_eq!(args.max_delay, 120);
        assert_eq!(args.concurrency, 4);
        assert_eq!(args.batch_size, 100);
    }

    #[test]
    fn test_global_log_level_after_subcommand() {
        let cli = Cli::try_parse_from([
            "chatpd-rs",
            "status",
            "--target",
            "@channel",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Command::Status(args) => assert!(!args.failed),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_state_yes() {
        let cli =
            Cli::try_parse_from(["chatpd-rs", "reset-state", "-t", "12345", "-y"]).unwrap();
        match cli.command {
            Command::ResetState(args) => {
                assert!(args.yes);
                assert_eq!(args.state.target, "12345");
            }
            other => panic!("expected reset-state, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_requires_api_id() {
        let result = Cli::try_parse_from([
            "chatpd-rs",
            "sync",
            "--target",
            "@channel",
            "--api-hash",
            "x",
            "--gateway-url",
            "http://localhost",
        ]);
        // CHATPD_API_ID may be set in the environment running the tests
        if std::env::var_os("CHATPD_API_ID").is_none() {
            assert!(result.is_err());
        }
    }
}
