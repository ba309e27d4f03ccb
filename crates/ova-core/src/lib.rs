//! Resilience and multi-provider dispatch for the OVA inference gateway.
//!
//! Requests for chat, sign recognition, image analysis and speech are sent to
//! an ordered list of hosted providers through a circuit breaker, retry and
//! timeout wrapper. Whatever the providers answer is normalized into one
//! canonical shape, and a local responder covers the case where none of them
//! can be reached.

pub mod error;
pub mod types;
pub mod config;
pub mod resilience;
pub mod provider;
pub mod normalize;
pub mod dispatch;
pub mod service;
pub mod util;

pub use error::{GatewayError, Result};
pub use service::Gateway;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
