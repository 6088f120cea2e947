use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    FixedDelay,
    LinearBackoff,
    ExponentialBackoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "crate::app::config::serde_helpers")]
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::FixedDelay,
            jitter: false,
        }
    }
}

/// Retries an operation while its failures are classified as transient.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.config.max_attempts.max(1)
    }

    /// Delay to wait before attempt number `attempt + 1` (zero-based `attempt`).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.config.base_delay.as_millis() as u64;
        let base_delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.saturating_pow(attempt);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => {
                Duration::from_millis(base_millis.saturating_mul(attempt as u64 + 1))
            }
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped_delay = std::cmp::min(base_delay, self.config.max_delay);

        if self.config.jitter {
            apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The last error is returned as is.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        label: &str,
        mut operation: F,
        is_retryable: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts_made = 0;

        loop {
            attempts_made += 1;
            debug!(label, attempt = attempts_made, "starting attempt");

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) && self.should_retry(attempts_made) => {
                    let delay = self.calculate_delay(attempts_made - 1);
                    warn!(
                        label,
                        attempt = attempts_made,
                        max_attempts = self.config.max_attempts,
                        "transient failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
    let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
    Duration::from_millis(jittered_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.calculate_delay(0), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(4), Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            strategy: RetryStrategy::ExponentialBackoff,
            ..RetryConfig::default()
        });
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(200),
            jitter: true,
            ..RetryConfig::default()
        });
        let delay = policy.calculate_delay(0);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retries_only_retryable_errors() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), String> = policy
            .run(
                "test",
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err("connection refused".to_string()) }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let counter = calls.clone();
        let result: Result<(), String> = policy
            .run(
                "test",
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err("bad request".to_string()) }
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<u32, String> = policy
            .run(
                "test",
                || {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 0 {
                            Err("connection reset".to_string())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 1);
    }
}
