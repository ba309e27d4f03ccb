//! The single entry point every outbound provider call goes through.
//!
//! Stages run in a fixed order:
//!
//! ```text
//! circuit check ──▶ retry loop ──▶ timeout guard ──▶ operation
//! ```
//!
//! Each retry attempt gets its own timeout window. The breaker hears about
//! the call once, after the retry loop has finished.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::circuit_breaker::CircuitBreaker;
use super::retry::RetryPolicy;
use super::timeout;
use crate::error::{ProviderError, ResilienceError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder composing breaker, retry, timeout and an optional static fallback.
#[derive(Debug, Clone)]
pub struct ResilientCall<T> {
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    retry: RetryPolicy,
    fallback: Option<T>,
    label: String,
}

impl<T: Clone> ResilientCall<T> {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
            fallback: None,
            label: "call".to_string(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Value returned instead of an error when the breaker is open or the
    /// call ultimately fails.
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Name used in log lines.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run an async operation through all stages.
    pub async fn run<F, Fut>(&self, mut op: F) -> Result<T, ResilienceError<ProviderError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let limit = self.timeout;
        self.execute(|| timeout::guard(limit, op())).await
    }

    /// Run a synchronous call on the blocking pool through all stages.
    pub async fn run_blocking<F>(&self, f: F) -> Result<T, ResilienceError<ProviderError>>
    where
        F: Fn() -> Result<T, ProviderError> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let limit = self.timeout;
        let f = Arc::new(f);
        self.execute(|| {
            let f = f.clone();
            timeout::guard_blocking(limit, move || f())
        })
        .await
    }

    /// Like [`ResilientCall::run`], but the call lives on its own task. If
    /// the caller goes away the wait is abandoned while the call still
    /// completes in the background and reports to the breaker.
    pub async fn run_detached<F, Fut>(&self, op: F) -> Result<T, ResilienceError<ProviderError>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        let call = self.clone();
        let handle = tokio::spawn(async move { call.run(op).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ResilienceError::Failed(ProviderError::Other(format!(
                "{} task failed: {}",
                self.label, e
            )))),
        }
    }

    async fn execute<F, Fut>(&self, mut attempt_fn: F) -> Result<T, ResilienceError<ProviderError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.breaker.allow_call() {
            return match &self.fallback {
                Some(value) => {
                    info!(call = %self.label, breaker = %self.breaker.name(), "Circuit open, using fallback value");
                    Ok(value.clone())
                }
                None => Err(ResilienceError::CircuitOpen(self.breaker.name().to_string())),
            };
        }

        let label = &self.label;
        let outcome = self
            .retry
            .run_provider(|attempt| {
                debug!(call = %label, attempt, "Starting attempt");
                attempt_fn()
            })
            .await;

        match outcome {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(call = %self.label, error = %e, "Resilient call failed");
                match &self.fallback {
                    Some(value) => {
                        info!(call = %self.label, "Using fallback value");
                        Ok(value.clone())
                    }
                    None => Err(ResilienceError::Failed(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("test", threshold, Duration::from_secs(30)))
    }

    fn quick_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_open_breaker_uses_fallback_without_calling() {
        let b = breaker(1);
        b.record_failure();
        let calls = AtomicU32::new(0);
        let call = ResilientCall::new(b).fallback("canned".to_string());
        let result = call
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("live".to_string()) }
            })
            .await;
        assert_eq!(result.unwrap(), "canned");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_without_fallback_errors() {
        let b = breaker(1);
        b.record_failure();
        let call: ResilientCall<u32> = ResilientCall::new(b);
        let result = call.run(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen(name)) if name == "test"));
    }

    #[tokio::test]
    async fn test_exhaustion_records_one_failure() {
        let b = breaker(5);
        let calls = AtomicU32::new(0);
        let call: ResilientCall<u32> = ResilientCall::new(b.clone()).retry(quick_retry(3));
        let result = call
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Other("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::Failed(ProviderError::Other(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(b.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_then_fallback_value() {
        let b = breaker(5);
        let call = ResilientCall::new(b.clone())
            .retry(quick_retry(2))
            .fallback(vec!["fallback"]);
        let result = call
            .run(|| async { Err(ProviderError::Api { status: 503, message: "loading".into() }) })
            .await;
        assert_eq!(result.unwrap(), vec!["fallback"]);
        assert_eq!(b.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_breaker() {
        let b = breaker(5);
        b.record_failure();
        b.record_failure();
        let call = ResilientCall::new(b.clone());
        assert_eq!(call.run(|| async { Ok(5u8) }).await.unwrap(), 5);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_gets_fresh_timeout() {
        let b = breaker(5);
        let calls = Arc::new(AtomicU32::new(0));
        let call = ResilientCall::new(b.clone())
            .timeout(Duration::from_secs(30))
            .retry(RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(10)));

        let c = calls.clone();
        let result = call
            .run(move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(45)).await;
                    } else {
                        tokio::time::sleep(Duration::from_secs(20)).await;
                    }
                    Ok("late but fine")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "late but fine");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let call = ResilientCall::new(breaker(5)).timeout(Duration::from_secs(5));
        let result = call.run_blocking(|| Ok("from a worker thread".to_string())).await;
        assert_eq!(result.unwrap(), "from a worker thread");
    }

    #[tokio::test]
    async fn test_detached_call_still_reports_after_caller_gives_up() {
        let b = breaker(5);
        let call: ResilientCall<()> = ResilientCall::new(b.clone()).retry(RetryPolicy::single());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            call.run_detached(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(ProviderError::Other("late failure".into()))
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.failure_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(b.failure_count(), 1);
    }
}
