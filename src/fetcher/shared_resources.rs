//! Shared HTTP client for all content sources
//!
//! `reqwest::Client` pools connections internally; sharing one instance keeps
//! that pool warm across the query, retrieve and children endpoints.
//!
//! Retry and circuit state is not global: each pipeline owns its own
//! [`crate::fetcher::circuit::RateLimitCircuit`].

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global HTTP client shared by all content sources
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 30 seconds
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("content-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {}. Check system TLS configuration.", e);
            }),
    )
});

/// Get the global HTTP client
///
/// Returns a clone of the Arc, which is cheap (just increments ref count)
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
