//! Shared HTTP client construction.
//!
//! One `reqwest::Client` is built at startup and injected everywhere so TCP
//! connections are pooled across all scholarly and full-text requests.

use std::time::Duration;

/// Idle connections kept alive per host. Semantic Scholar allows 100 req/s
/// on the free tier; half of that leaves a safety margin.
const POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Total request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long an idle pooled connection is kept before being dropped.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Build the process-wide HTTP client.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("litreview/", env!("CARGO_PKG_VERSION")))
        .build()
}
