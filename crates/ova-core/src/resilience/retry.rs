//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProviderError;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// How many times to run an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy that runs the operation exactly once.
    pub fn single() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before 1-based `attempt`: nothing before the first, then
    /// `min(base * 2^(attempt-2), max)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
    /// or the attempts run out. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(attempt, attempts, error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    warn!(attempt, attempts, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`RetryPolicy::run`] with the default provider classification.
    pub async fn run_provider<T, F, Fut>(&self, op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.run(ProviderError::is_retryable, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
        assert_eq!(policy.delay_before(5), Duration::from_secs(8));
        assert_eq!(policy.delay_before(6), Duration::from_secs(10));
        assert_eq!(policy.delay_before(40), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY).attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_without_trailing_wait() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10));
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let c = calls.clone();
        let result = policy
            .run_provider(move |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Other("connection reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before attempt 2, 2s before attempt 3, nothing after.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(3100), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1));
        let result: Result<(), ProviderError> = policy
            .run_provider(|attempt| async move { Err(ProviderError::Other(format!("fail {}", attempt))) })
            .await;
        assert_eq!(result.unwrap_err().to_string(), "fail 2");
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60), Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let result: Result<(), ProviderError> = policy
            .run_provider(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Parse("bad json".into())) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy
            .run(
                |e: &String| e.starts_with("transient"),
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err("transient glitch".to_string())
                        } else {
                            Err("fatal".to_string())
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
