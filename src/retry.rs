use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use crate::types::BackoffPolicy;

/// Delay schedule applied between consecutive failures.
///
/// `Constant` waits `base_delay_secs` every time. `Exponential` doubles the
/// base per failure, caps at `max_delay_secs` and adds jitter so concurrent
/// transfers hitting the same outage don't retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub policy: BackoffPolicy,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl BackoffConfig {
    pub fn constant(delay_secs: u64) -> Self {
        Self {
            policy: BackoffPolicy::Constant,
            base_delay_secs: delay_secs,
            max_delay_secs: delay_secs,
        }
    }

    /// Compute the delay after the given failure (0-indexed).
    ///
    /// Exponential formula: `min(base * 2^retry, max) + random_jitter(0..base)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self.policy {
            BackoffPolicy::Constant => Duration::from_secs(self.base_delay_secs),
            BackoffPolicy::Exponential => {
                let exp_delay = self
                    .base_delay_secs
                    .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
                let capped = exp_delay.min(self.max_delay_secs);
                let jitter = if self.base_delay_secs > 0 {
                    rand::thread_rng().gen_range(0..self.base_delay_secs)
                } else {
                    0
                };
                Duration::from_secs(capped.saturating_add(jitter))
            }
        }
    }
}

/// Attempt budget for a single item transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::constant(2),
        }
    }
}

/// Sleep for `delay` unless the token fires first.
///
/// Returns `false` when the sleep was cut short by a stop request.
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff.policy, BackoffPolicy::Constant);
        assert_eq!(config.backoff.base_delay_secs, 2);
    }

    #[test]
    fn test_constant_delay_ignores_retry_index() {
        let backoff = BackoffConfig::constant(5);
        assert_eq!(backoff.delay_for_retry(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_retry(7), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let backoff = BackoffConfig {
            policy: BackoffPolicy::Exponential,
            base_delay_secs: 2,
            max_delay_secs: 60,
        };
        // retry 0: 2*1=2, jitter in 0..2
        let d = backoff.delay_for_retry(0);
        assert!(d.as_secs() >= 2 && d.as_secs() < 4);

        // retry 2: 2*4=8, jitter in 0..2
        let d = backoff.delay_for_retry(2);
        assert!(d.as_secs() >= 8 && d.as_secs() < 10);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let backoff = BackoffConfig {
            policy: BackoffPolicy::Exponential,
            base_delay_secs: 5,
            max_delay_secs: 30,
        };
        let d = backoff.delay_for_retry(10);
        assert!(d.as_secs() >= 30 && d.as_secs() < 35);
    }

    #[test]
    fn test_delay_zero_base() {
        let backoff = BackoffConfig {
            policy: BackoffPolicy::Exponential,
            base_delay_secs: 0,
            max_delay_secs: 60,
        };
        assert_eq!(backoff.delay_for_retry(3), Duration::ZERO);
    }

    #[test]
    fn test_delay_saturates_near_max() {
        let backoff = BackoffConfig {
            policy: BackoffPolicy::Exponential,
            base_delay_secs: 10,
            max_delay_secs: u64::MAX,
        };
        assert_eq!(backoff.delay_for_retry(70), Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_millis(5), &token).await);
    }

    #[tokio::test]
    async fn sleep_returns_false_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &token).await);
    }

    #[tokio::test]
    async fn sleep_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &token).await);
    }
}
