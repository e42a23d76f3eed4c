//! Concurrent page fetch scheduler.
//!
//! Politeness rules: no two requests to the same domain start within the
//! configured minimum interval, global concurrency is bounded by a worker
//! pool, transient failures are retried with exponential backoff, and every
//! URL is fetched at most once per run thanks to a run-lifetime cache.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::audit::RunAudit;
use crate::fetch::client::create_http_client;
use crate::fetch::text::TextExtractor;
use crate::fetch::triage::normalize_domain;
use crate::models::{FetchConfig, FetchStatus, PageFetchResult};
use crate::TARGET_WEB_REQUEST;

/// How a single attempt ended.
enum Attempt {
    Success { code: u16, body: String },
    Transient { code: Option<u16>, error: String },
    RateLimited { code: u16 },
    Permanent { code: Option<u16>, error: String },
}

/// Classify an HTTP status per the retry policy: 5xx and 429 are worth
/// retrying, other 4xx are not.
fn classify_status(code: u16) -> FetchStatus {
    if code == 429 || code >= 500 {
        FetchStatus::TransientError
    } else if code >= 400 {
        FetchStatus::PermanentError
    } else {
        FetchStatus::Ok
    }
}

pub struct FetchScheduler {
    client: reqwest::Client,
    config: FetchConfig,
    cache: DashMap<String, PageFetchResult>,
    /// URLs whose cached error result has already been given its one fresh
    /// re-attempt.
    error_refetched: DashSet<String>,
    throttle: Mutex<HashMap<String, Instant>>,
    semaphore: Arc<Semaphore>,
    extractor: Box<dyn TextExtractor>,
}

impl FetchScheduler {
    pub fn new(config: FetchConfig, extractor: Box<dyn TextExtractor>) -> anyhow::Result<Self> {
        let client = create_http_client(config.timeout)?;
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Ok(FetchScheduler {
            client,
            config,
            cache: DashMap::new(),
            error_refetched: DashSet::new(),
            throttle: Mutex::new(HashMap::new()),
            semaphore,
            extractor,
        })
    }

    /// Fetch every URL concurrently, streaming each `PageFetchResult` to `tx`
    /// as it completes. Arrival order is not meaningful. Per-URL failures are
    /// reported as results, never as task failures.
    pub async fn fetch_all(
        self: Arc<Self>,
        urls: Vec<String>,
        audit: Arc<RunAudit>,
        tx: mpsc::Sender<PageFetchResult>,
        cancel: watch::Receiver<bool>,
    ) {
        let mut tasks = JoinSet::new();

        for url in urls {
            if *cancel.borrow() {
                info!(target: TARGET_WEB_REQUEST, "Cancellation requested, not scheduling remaining fetches");
                break;
            }

            let scheduler = Arc::clone(&self);
            let audit = Arc::clone(&audit);
            let tx = tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = scheduler
                    .semaphore
                    .acquire()
                    .await
                    .expect("fetch semaphore closed");
                if *cancel.borrow() {
                    return;
                }

                let result = scheduler.fetch_one(&url).await;
                audit.record_fetch(
                    &result.url,
                    result.status,
                    result.status_code,
                    result.error.as_deref(),
                    result.content_hash.as_deref(),
                );
                // The receiver only disappears on cancellation.
                let _ = tx.send(result).await;
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Fetch one URL, consulting the run cache first.
    pub async fn fetch_one(&self, url: &str) -> PageFetchResult {
        if let Some(cached) = self.take_cached(url) {
            debug!(target: TARGET_WEB_REQUEST, "Cache hit for {}", url);
            return cached;
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                let result =
                    self.error_result(url, "", FetchStatus::PermanentError, None, &format!("invalid URL: {}", e));
                self.cache.insert(url.to_string(), result.clone());
                return result;
            }
        };
        let domain = normalize_domain(url);

        let mut backoff = 2u64;
        let mut last_error = String::from("no attempts made");
        let mut last_code = None;

        for attempt_count in 0..self.config.max_attempts {
            let slot = self.reserve_slot(&domain).await;
            sleep_until(slot).await;

            match self.attempt(url).await {
                Attempt::Success { code, body } => {
                    let text = self.extractor.extract_text(&body, &parsed);
                    let content_hash = format!("{:x}", Sha256::digest(text.as_bytes()));
                    debug!(target: TARGET_WEB_REQUEST, "Fetched {} ({} chars of text)", url, text.len());
                    let result = PageFetchResult {
                        url: url.to_string(),
                        domain,
                        status: FetchStatus::Ok,
                        status_code: Some(code),
                        text: Some(text),
                        content_hash: Some(content_hash),
                        page_type: None,
                        error: None,
                        fetched_at: Utc::now(),
                    };
                    self.cache.insert(url.to_string(), result.clone());
                    return result;
                }
                Attempt::RateLimited { code } => {
                    warn!(target: TARGET_WEB_REQUEST, "Rate limited by {} (429), cooling domain down", domain);
                    self.apply_cooldown(&domain).await;
                    last_error = "rate limited (429)".to_string();
                    last_code = Some(code);
                }
                Attempt::Transient { code, error } => {
                    warn!(target: TARGET_WEB_REQUEST, "Transient failure fetching {}: {}", url, error);
                    last_error = error;
                    last_code = code;
                }
                Attempt::Permanent { code, error } => {
                    debug!(target: TARGET_WEB_REQUEST, "Permanent failure fetching {}: {}", url, error);
                    let result = self.error_result(
                        url,
                        &domain,
                        FetchStatus::PermanentError,
                        code,
                        &error,
                    );
                    self.cache.insert(url.to_string(), result.clone());
                    return result;
                }
            }

            if attempt_count < self.config.max_attempts - 1 {
                debug!(target: TARGET_WEB_REQUEST, "Backing off {}s before retrying {}", backoff, url);
                sleep(Duration::from_secs(backoff)).await;
                backoff *= 2;
            }
        }

        error!(target: TARGET_WEB_REQUEST, "Giving up on {} after {} attempts: {}", url, self.config.max_attempts, last_error);
        let result = self.error_result(url, &domain, FetchStatus::TransientError, last_code, &last_error);
        self.cache.insert(url.to_string(), result.clone());
        result
    }

    /// One network attempt, classified.
    async fn attempt(&self, url: &str) -> Attempt {
        let request = self.client.get(url).send();
        match timeout(self.config.timeout, request).await {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                match classify_status(code) {
                    FetchStatus::Ok => match response.text().await {
                        Ok(body) => Attempt::Success { code, body },
                        Err(e) => Attempt::Transient {
                            code: Some(code),
                            error: format!("failed to read body: {}", e),
                        },
                    },
                    FetchStatus::TransientError if code == 429 => Attempt::RateLimited { code },
                    FetchStatus::TransientError => Attempt::Transient {
                        code: Some(code),
                        error: format!("status {}", code),
                    },
                    _ => Attempt::Permanent {
                        code: Some(code),
                        error: format!("status {}", code),
                    },
                }
            }
            Ok(Err(e)) => {
                let msg = e.to_string();
                // reqwest folds DNS resolution failures into connect errors;
                // they will not heal within a run.
                if msg.to_lowercase().contains("dns") {
                    Attempt::Permanent {
                        code: None,
                        error: format!("dns failure: {}", msg),
                    }
                } else {
                    Attempt::Transient {
                        code: None,
                        error: msg,
                    }
                }
            }
            Err(_) => Attempt::Transient {
                code: None,
                error: format!("timed out after {}s", self.config.timeout.as_secs()),
            },
        }
    }

    /// Return the cached result for `url` if it should be served from cache.
    /// A cached success is served as `Cached`; a cached error is evicted once
    /// so a single fresh attempt can be made, then served as-is.
    fn take_cached(&self, url: &str) -> Option<PageFetchResult> {
        let cached = self.cache.get(url)?;
        match cached.status {
            FetchStatus::Ok | FetchStatus::Cached => {
                let mut result = cached.clone();
                result.status = FetchStatus::Cached;
                Some(result)
            }
            FetchStatus::TransientError | FetchStatus::PermanentError => {
                if self.error_refetched.insert(url.to_string()) {
                    drop(cached);
                    self.cache.remove(url);
                    None
                } else {
                    Some(cached.clone())
                }
            }
        }
    }

    /// Reserve the next request slot for a domain. Callers sleep until the
    /// returned instant before sending; the map is advanced immediately so
    /// concurrent workers on the same domain line up behind each other.
    async fn reserve_slot(&self, domain: &str) -> Instant {
        let mut throttle = self.throttle.lock().await;
        let now = Instant::now();
        let slot = throttle
            .get(domain)
            .copied()
            .map(|next| next.max(now))
            .unwrap_or(now);
        throttle.insert(domain.to_string(), slot + self.config.min_domain_interval);
        slot
    }

    /// Push a domain's next slot out by the rate-limit cooldown.
    async fn apply_cooldown(&self, domain: &str) {
        let mut throttle = self.throttle.lock().await;
        let held_until = Instant::now() + self.config.rate_limit_cooldown;
        let next = throttle
            .get(domain)
            .copied()
            .map(|next| next.max(held_until))
            .unwrap_or(held_until);
        throttle.insert(domain.to_string(), next);
    }

    fn error_result(
        &self,
        url: &str,
        domain: &str,
        status: FetchStatus,
        status_code: Option<u16>,
        error: &str,
    ) -> PageFetchResult {
        PageFetchResult {
            url: url.to_string(),
            domain: domain.to_string(),
            status,
            status_code,
            text: None,
            content_hash: None,
            page_type: None,
            error: Some(error.to_string()),
            fetched_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::text::ReadabilityExtractor;

    fn scheduler() -> FetchScheduler {
        FetchScheduler::new(
            FetchConfig::default(),
            Box::new(ReadabilityExtractor::new(8_000)),
        )
        .unwrap()
    }

    fn ok_result(url: &str) -> PageFetchResult {
        PageFetchResult {
            url: url.to_string(),
            domain: normalize_domain(url),
            status: FetchStatus::Ok,
            status_code: Some(200),
            text: Some("Acme Windows, supplier of windows.".to_string()),
            content_hash: Some("deadbeef".to_string()),
            page_type: None,
            error: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), FetchStatus::Ok);
        assert_eq!(classify_status(301), FetchStatus::Ok);
        assert_eq!(classify_status(404), FetchStatus::PermanentError);
        assert_eq!(classify_status(403), FetchStatus::PermanentError);
        assert_eq!(classify_status(429), FetchStatus::TransientError);
        assert_eq!(classify_status(500), FetchStatus::TransientError);
        assert_eq!(classify_status(503), FetchStatus::TransientError);
    }

    #[tokio::test]
    async fn test_cached_success_served_without_network() {
        let scheduler = scheduler();
        let url = "https://acme.example/contact";
        scheduler.cache.insert(url.to_string(), ok_result(url));

        let result = scheduler.fetch_one(url).await;
        assert_eq!(result.status, FetchStatus::Cached);
        assert!(result.is_usable());
    }

    #[tokio::test]
    async fn test_cached_error_gets_one_fresh_attempt() {
        let scheduler = scheduler();
        // An unparseable URL resolves without touching the network.
        let url = "not a url at all";
        let error = scheduler.error_result(url, "", FetchStatus::TransientError, None, "boom");
        scheduler.cache.insert(url.to_string(), error);

        // First hit evicts the cached error and re-attempts (here: resolves
        // to a permanent invalid-URL result).
        let first = scheduler.fetch_one(url).await;
        assert_eq!(first.status, FetchStatus::PermanentError);

        // Second hit serves the cached error as-is; no second re-attempt.
        let second = scheduler.fetch_one(url).await;
        assert_eq!(second.status, FetchStatus::PermanentError);
        assert_eq!(scheduler.error_refetched.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let scheduler = scheduler();
        let result = scheduler.fetch_one("::such nonsense::").await;
        assert_eq!(result.status, FetchStatus::PermanentError);
        assert!(result.error.unwrap().contains("invalid URL"));
    }

    #[tokio::test]
    async fn test_reserve_slot_spaces_same_domain() {
        let scheduler = scheduler();
        let first = scheduler.reserve_slot("acme.example").await;
        let second = scheduler.reserve_slot("acme.example").await;
        let third = scheduler.reserve_slot("other.example").await;

        assert!(second >= first + FetchConfig::default().min_domain_interval);
        // Distinct domains do not wait on each other.
        assert!(third < first + FetchConfig::default().min_domain_interval);
    }

    #[tokio::test]
    async fn test_cooldown_pushes_slot_out() {
        let scheduler = scheduler();
        let before = scheduler.reserve_slot("busy.example").await;
        scheduler.apply_cooldown("busy.example").await;
        let after = scheduler.reserve_slot("busy.example").await;
        assert!(after >= before + FetchConfig::default().rate_limit_cooldown);
    }
}
