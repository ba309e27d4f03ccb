pub mod gateway;

pub use gateway::{Gateway, Health, HealthStatus};
