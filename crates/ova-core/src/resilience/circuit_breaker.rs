//! Circuit breaker shared by every call to one external dependency class.
//!
//! ```text
//! Closed ──(failures >= threshold)──▶ Open
//! Open ──(recovery timeout elapsed, next allow_call)──▶ Closed, counter cleared
//! any ──reset()──▶ Closed
//! ```
//!
//! All transitions happen under one mutex so two racing requests can never
//! both observe a closed breaker after the threshold was crossed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    is_open: bool,
}

/// Failure counter and open/closed gate for one dependency class.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Point-in-time view of a breaker for the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub is_open: bool,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, BreakerState> {
        // A panic while holding the lock cannot leave the counters torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may go out now. An open breaker whose recovery timeout
    /// has elapsed closes again and lets the call through.
    pub fn allow_call(&self) -> bool {
        let mut state = self.state();
        if !state.is_open {
            return true;
        }

        let elapsed = state
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(self.recovery_timeout);
        if elapsed >= self.recovery_timeout {
            info!(breaker = %self.name, "Circuit breaker attempting recovery");
            state.is_open = false;
            state.failure_count = 0;
            true
        } else {
            warn!(
                breaker = %self.name,
                retry_in_ms = (self.recovery_timeout - elapsed).as_millis() as u64,
                "Circuit breaker is open, rejecting call"
            );
            false
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        state.failure_count = 0;
        state.is_open = false;
    }

    pub fn record_failure(&self) {
        let mut state = self.state();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        if state.failure_count >= self.failure_threshold && !state.is_open {
            state.is_open = true;
            error!(
                breaker = %self.name,
                failures = state.failure_count,
                "Circuit breaker opened after repeated failures"
            );
        }
    }

    /// Administrative reset: closed, no failures, no failure timestamp.
    pub fn reset(&self) {
        let mut state = self.state();
        *state = BreakerState::default();
        info!(breaker = %self.name, "Circuit breaker reset manually");
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open
    }

    pub fn failure_count(&self) -> u32 {
        self.state().failure_count
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state();
        BreakerStatus {
            name: self.name.clone(),
            is_open: state.is_open,
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout_secs: self.recovery_timeout.as_secs(),
            last_failure_at: state.last_failure_at,
        }
    }
}

/// One shared breaker per dependency class, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Get the breaker for `class`, creating it with the registry settings.
    pub fn get(&self, class: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(class.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(class, self.failure_threshold, self.recovery_timeout))
            })
            .clone()
    }

    pub fn status(&self, class: &str) -> Option<BreakerStatus> {
        self.breakers.get(class).map(|b| b.status())
    }

    /// Snapshot of every known breaker, sorted by name.
    pub fn status_all(&self) -> Vec<BreakerStatus> {
        let mut all: Vec<BreakerStatus> = self.breakers.iter().map(|b| b.status()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Reset one breaker. Returns false if the class is unknown.
    pub fn reset(&self, class: &str) -> bool {
        match self.breakers.get(class) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn any_open(&self) -> bool {
        self.breakers.iter().any(|b| b.is_open())
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_recovers() {
        let breaker = CircuitBreaker::new("huggingface", 5, Duration::from_secs(30));
        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.allow_call());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow_call());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!breaker.allow_call());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_call());
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_beyond_threshold_extend_cooldown() {
        let breaker = CircuitBreaker::new("hf", 2, Duration::from_secs(10));
        for _ in 0..7 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(6)).await;
        // Only 6s since the last failure.
        assert!(!breaker.allow_call());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(breaker.allow_call());
    }

    #[test]
    fn test_success_clears_failures() {
        let breaker = CircuitBreaker::with_defaults("hf");
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow_call());
    }

    #[test]
    fn test_reset_from_open() {
        let breaker = CircuitBreaker::new("hf", 1, Duration::from_secs(3600));
        breaker.record_failure();
        assert!(!breaker.allow_call());

        breaker.reset();
        assert!(breaker.allow_call());
        let status = breaker.status();
        assert_eq!(status.failure_count, 0);
        assert!(!status.is_open);
        assert!(status.last_failure_at.is_none());
    }

    #[test]
    fn test_status_snapshot() {
        let breaker = CircuitBreaker::new("spaces", 3, Duration::from_secs(30));
        breaker.record_failure();
        let status = breaker.status();
        assert_eq!(status.name, "spaces");
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.failure_threshold, 3);
        assert_eq!(status.recovery_timeout_secs, 30);
        assert!(status.last_failure_at.is_some());
    }

    #[test]
    fn test_registry_shares_instances() {
        let registry = BreakerRegistry::new(2, Duration::from_secs(30));
        let a = registry.get("huggingface");
        let b = registry.get("huggingface");
        a.record_failure();
        a.record_failure();
        assert!(b.is_open());
        assert!(registry.any_open());

        assert!(registry.reset("huggingface"));
        assert!(!registry.reset("unknown"));
        assert!(!b.is_open());
    }

    #[test]
    fn test_registry_status_sorted() {
        let registry = BreakerRegistry::default();
        registry.get("spaces");
        registry.get("huggingface");
        let names: Vec<String> = registry.status_all().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["huggingface", "spaces"]);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        let breaker = Arc::new(CircuitBreaker::new("hf", 5, Duration::from_secs(30)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        b.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(breaker.failure_count(), 80);
        assert!(breaker.is_open());
    }
}
