//! HTTP client creation for page fetching.

use anyhow::Result;
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::TARGET_WEB_REQUEST;

const USER_AGENT: &str = concat!("prospect/", env!("CARGO_PKG_VERSION"), " (B2B lead research)");

/// Create the shared HTTP client used for every fetch in a run.
pub fn create_http_client(timeout: Duration) -> Result<reqwest::Client> {
    debug!(target: TARGET_WEB_REQUEST, "Creating HTTP client with {}s timeout", timeout.as_secs());

    let cookie_store = Jar::default();
    reqwest::Client::builder()
        .cookie_store(true)
        .cookie_provider(Arc::new(cookie_store))
        .gzip(true)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}
