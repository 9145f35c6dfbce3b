//! Retry policy for transient store errors.

use common::config::SweeperConfig;
use common::store::{StoreResult, with_timeout};
use std::future::Future;
use std::time::Duration;

use crate::metrics::SweepMetrics;

/// Exponential backoff: `base_delay * 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SweeperConfig::default())
    }
}

impl From<&SweeperConfig> for RetryPolicy {
    fn from(config: &SweeperConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn allows(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

/// Run a read under the store timeout, retrying transient failures.
///
/// `call` is invoked once per attempt so each attempt issues a fresh request.
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    metrics: &SweepMetrics,
    what: &str,
    mut call: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut retries = 0;
    loop {
        match with_timeout(timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.allows(retries) => {
                retries += 1;
                let delay = policy.delay_for(retries);
                tracing::warn!(
                    read = what,
                    attempt = retries,
                    error = %e,
                    delay = ?delay,
                    "Transient store error on read, retrying"
                );
                metrics.record_retry();
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_defaults_follow_sweeper_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[tokio::test]
    async fn test_transient_read_is_retried() {
        let calls = AtomicU32::new(0);
        let metrics = SweepMetrics::new();

        let result = retry_read(&policy(3), Duration::from_secs(1), &metrics, "get", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("flaky".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(metrics.retries_attempted(), 2);
    }

    #[tokio::test]
    async fn test_permanent_read_fails_immediately() {
        let calls = AtomicU32::new(0);
        let metrics = SweepMetrics::new();

        let result: StoreResult<()> =
            retry_read(&policy(3), Duration::from_secs(1), &metrics, "get", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::PermissionDenied("rules".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.retries_attempted(), 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let metrics = SweepMetrics::new();

        let result: StoreResult<()> =
            retry_read(&policy(2), Duration::from_secs(1), &metrics, "scan", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::RateLimited("quota".to_string())) }
            })
            .await;

        assert_eq!(result, Err(StoreError::RateLimited("quota".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
