//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed operation with exponential backoff
//! - Stop immediately on cancellation, open circuits and configuration errors
//! - Annotate the final error with the number of attempts
//!
//! The policy is plain data; it holds no state between calls.

use std::future::Future;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::QueryConfig;
use crate::error::{QueryError, QueryResult};
use crate::observability::metrics;
use crate::resilience::backoff::{apply_jitter, calculate_backoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.retry_jitter,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay slept after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = calculate_backoff(attempt, self.base_delay, self.max_delay);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is exhausted.
    pub async fn execute<T, F, Fut>(&self, clock: &dyn Clock, mut operation: F) -> QueryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueryResult<T>>,
    {
        if self.max_attempts == 0 {
            return Err(QueryError::configuration("max_attempts must be at least 1"));
        }

        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "Retries exhausted");
                return Err(QueryError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::info!(attempt, ?delay, error = %error, "Retrying operation");
            metrics::record_retry(attempt);
            if !delay.is_zero() {
                clock.sleep(delay).await;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[tokio::test]
    async fn test_always_failing_backs_off_then_gives_up() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result: QueryResult<()> = policy()
            .execute(&clock, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(QueryError::transport("503")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_delay_is_capped() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::new(5, Duration::from_millis(400), Duration::from_millis(1000));

        let _: QueryResult<()> = policy
            .execute(&clock, || async { Err(QueryError::connection("refused")) })
            .await;

        // 400 + 800 + 1000 + 1000
        assert_eq!(clock.elapsed(), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);

        let result = policy()
            .execute(&clock, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(QueryError::Timeout(Duration::from_secs(1)))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(clock.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_non_retryable_errors_propagate_immediately() {
        let clock = ManualClock::new();
        for error in [
            QueryError::Cancelled,
            QueryError::CircuitOpen { circuit: "payments".into() },
        ] {
            let calls = AtomicU32::new(0);
            let result: QueryResult<()> = policy()
                .execute(&clock, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let error = error.clone();
                    async move { Err(error) }
                })
                .await;

            assert_eq!(result, Err(error));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_configuration_error() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        let result: QueryResult<()> = policy.execute(&clock, || async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
    }
}
