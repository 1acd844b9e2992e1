use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::cli::{StateArgs, SyncArgs};
use crate::client::PeerTarget;
use crate::retry::{BackoffConfig, RetryConfig};
use crate::walker::WalkConfig;

/// Per-target files under the state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub checkpoint: PathBuf,
    pub ledger: PathBuf,
    pub lock: PathBuf,
}

impl StatePaths {
    pub fn new(dir: PathBuf, target: &PeerTarget) -> Self {
        let key = target.state_key();
        Self {
            checkpoint: dir.join(format!("{key}.resume.json")),
            ledger: dir.join(format!("{key}.db")),
            lock: dir.join(format!("{key}.lock")),
            dir,
        }
    }

    /// Resolve the target and state directory given on the command line.
    pub fn from_args(args: &StateArgs) -> anyhow::Result<(PeerTarget, Self)> {
        let target: PeerTarget = args
            .target
            .parse()
            .with_context(|| format!("Invalid target '{}'", args.target))?;
        let paths = Self::new(expand_tilde(&args.state_dir), &target);
        Ok((target, paths))
    }
}

/// Validated settings for a `sync` run.
pub struct Config {
    pub target: PeerTarget,
    pub api_hash: String,
    pub gateway_url: String,
    pub directory: PathBuf,
    pub state: StatePaths,
    pub session_file: PathBuf,
    pub walk: WalkConfig,
    pub retry: RetryConfig,
    pub timeout_secs: u64,
    pub api_id: i32,
    pub notify_systemd: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("target", &self.target)
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("gateway_url", &self.gateway_url)
            .field("directory", &self.directory)
            .field("state", &self.state)
            .field("walk", &self.walk)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_args(args: SyncArgs) -> anyhow::Result<Self> {
        if args.batch_size == 0 {
            anyhow::bail!("--batch-size must be at least 1");
        }
        if args.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be at least 1");
        }
        if args.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if !(args.gateway_url.starts_with("http://") || args.gateway_url.starts_with("https://"))
        {
            anyhow::bail!(
                "--gateway-url must be an http(s) URL, got '{}'",
                args.gateway_url
            );
        }

        let (target, state) = StatePaths::from_args(&args.state)?;
        let session_file = match &args.session_file {
            Some(path) => expand_tilde(path),
            None => state.dir.join("session.json"),
        };

        let backoff = |base_delay_secs: u64| BackoffConfig {
            policy: args.backoff,
            base_delay_secs,
            max_delay_secs: args.max_delay.max(base_delay_secs),
        };

        Ok(Self {
            target,
            api_hash: args.api_hash.clone(),
            gateway_url: args.gateway_url.trim_end_matches('/').to_string(),
            directory: expand_tilde(&args.directory),
            state,
            session_file,
            walk: WalkConfig {
                batch_size: args.batch_size,
                batch_delay_secs: args.batch_delay,
                fetch_backoff: backoff(args.fetch_retry_delay),
                concurrency: args.concurrency,
            },
            retry: RetryConfig {
                max_attempts: args.max_attempts,
                backoff: backoff(args.attempt_delay),
            },
            timeout_secs: args.timeout,
            api_id: args.api_id,
            notify_systemd: args.notify_systemd,
        })
    }

    pub fn session_file(&self) -> &Path {
        &self.session_file
    }
}
