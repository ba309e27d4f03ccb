//! Calling discipline for unreliable inference endpoints.
//!
//! - [`CircuitBreaker`] / [`BreakerRegistry`]: one failure gate per dependency class
//! - [`RetryPolicy`]: bounded retries with exponential backoff
//! - [`timeout`]: per-attempt wall-clock bounds
//! - [`ResilientCall`]: the composition of all three, plus a static fallback

pub mod call;
pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use call::{ResilientCall, DEFAULT_CALL_TIMEOUT};
pub use circuit_breaker::{
    BreakerRegistry, BreakerStatus, CircuitBreaker, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT,
};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
