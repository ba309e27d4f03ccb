//! Multi-provider dispatch.
//!
//! Each dispatcher walks its providers in order through the resilient call
//! wrapper. The first success wins; provider errors are logged and never
//! returned to the caller. When every provider fails, or the shared breaker
//! is open, the answer comes from the local responder instead.

pub mod chat;
pub mod speech;
pub mod vision;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, Environment};
use crate::provider::{GradioSpaceClient, HfInferenceClient, InferenceBackend, SpaceBackend};
use crate::resilience::{BreakerRegistry, CircuitBreaker, ResilientCall, RetryPolicy};
use crate::types::Capability;

pub use chat::{ChatConvention, ChatDispatcher, DEFAULT_SYSTEM_PROMPT};
pub use speech::SpeechDispatcher;
pub use vision::{ImageConvention, VisionDispatcher};

/// The two outbound backends shared by all dispatchers.
#[derive(Clone)]
pub struct Backends {
    pub inference: Arc<dyn InferenceBackend>,
    pub spaces: Arc<dyn SpaceBackend>,
}

impl Backends {
    pub fn new(inference: Arc<dyn InferenceBackend>, spaces: Arc<dyn SpaceBackend>) -> Self {
        Self { inference, spaces }
    }

    /// HTTP backends built from config. Spaces only get the token in
    /// production; public spaces are called anonymously elsewhere.
    pub fn from_config(config: &Config) -> Self {
        let space_token = if config.environment == Environment::Production {
            Some(config.huggingface.token.clone())
        } else {
            None
        };
        Self {
            inference: Arc::new(HfInferenceClient::from_config(&config.huggingface)),
            spaces: Arc::new(GradioSpaceClient::new(space_token)),
        }
    }
}

/// Breaker, timeout and retry policy for one capability.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub breaker: Arc<CircuitBreaker>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl CallSettings {
    pub fn new(breaker: Arc<CircuitBreaker>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self { breaker, timeout, retry }
    }

    pub fn from_config(config: &Config, capability: Capability, breakers: &BreakerRegistry) -> Self {
        let cap = config.capability(capability);
        Self {
            breaker: breakers.get(&cap.dependency_class),
            timeout: cap.timeout(),
            retry: config.retry_policy(capability),
        }
    }

    /// A fresh wrapper with these settings.
    pub fn call<T: Clone>(&self, label: impl Into<String>) -> ResilientCall<T> {
        ResilientCall::new(self.breaker.clone())
            .timeout(self.timeout)
            .retry(self.retry)
            .label(label)
    }
}

/// Short id tying together the log lines of one dispatch.
pub(crate) fn correlation_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
