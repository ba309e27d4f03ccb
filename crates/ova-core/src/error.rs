use std::path::PathBuf;
use std::time::Duration;

/// Core error types for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No providers registered for capability '{0}'")]
    NoProviders(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Error reported by the remote endpoint itself (e.g. a Gradio `error` event).
    #[error("Remote endpoint error: {0}")]
    Remote(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The provider answered but the answer was not a usable recognition.
    #[error("Unrecognized result: {0}")]
    Unrecognized(String),

    #[error("No API token configured for provider")]
    NoApiKey,

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Transient failures worth another attempt: connection problems,
    /// timeouts, rate limits, server errors and generic failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::Timeout(_) | ProviderError::Other(_) => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Remote(_) => !self.is_calling_convention_mismatch(),
            ProviderError::Parse(_) | ProviderError::Unrecognized(_) | ProviderError::NoApiKey => {
                false
            }
        }
    }

    /// An interactive endpoint rejected the argument layout, typically
    /// "'bool' object is not iterable" when a history slot got a boolean.
    pub fn is_calling_convention_mismatch(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("bool") && message.contains("iterable")
    }

    /// Transport-level failure: no point trying another argument layout
    /// against the same endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Http(_) | ProviderError::Timeout(_))
    }
}

/// Outcome of a call made through the resilience layer.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error(transparent)]
    Failed(E),
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
