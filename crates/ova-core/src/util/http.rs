use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Upper bound on any single request. Per-capability timeouts are enforced
/// by the resilient call wrapper and are always shorter.
const REQUEST_CEILING: Duration = Duration::from_secs(180);

/// Global HTTP client with connection pooling and keep-alive.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(REQUEST_CEILING)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("ova-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to create HTTP client")
});

/// Get the global HTTP client.
pub fn client() -> &'static Client {
    &HTTP_CLIENT
}
