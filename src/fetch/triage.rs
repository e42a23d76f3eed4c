//! URL triage ahead of scheduling: blocklist filtering and per-domain caps.

use std::collections::HashMap;
use url::Url;

use crate::audit::RunAudit;

/// Domains that never yield extractable B2B pages: social networks,
/// aggregators, marketplaces.
const BLOCKED_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "youtube.com",
    "pinterest.com",
    "reddit.com",
    "quora.com",
    "wikipedia.org",
    "amazon.com",
    "ebay.com",
];

/// Lower-cased host of a URL with any `www.` prefix stripped. Accepts bare
/// domains as well as full URLs.
pub fn normalize_domain(url_or_domain: &str) -> String {
    let host = if url_or_domain.starts_with("http://") || url_or_domain.starts_with("https://") {
        Url::parse(url_or_domain)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    } else {
        url_or_domain.split('/').next().unwrap_or_default().to_string()
    };
    let host = host.trim().to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

fn is_blocked(domain: &str, extra_blocked: &[String]) -> bool {
    BLOCKED_DOMAINS
        .iter()
        .any(|blocked| domain == *blocked || domain.ends_with(&format!(".{}", blocked)))
        || extra_blocked.iter().any(|blocked| {
            let blocked = normalize_domain(blocked);
            domain == blocked || domain.ends_with(&format!(".{}", blocked))
        })
}

/// Drop unparseable and blocklisted URLs, recording each drop.
pub fn filter_urls(urls: Vec<String>, extra_blocked: &[String], audit: &RunAudit) -> Vec<String> {
    let mut kept = Vec::new();
    for url in urls {
        if Url::parse(&url).is_err() {
            audit.record_url_filtered(&url, "unparseable URL");
            continue;
        }
        let domain = normalize_domain(&url);
        if domain.is_empty() {
            audit.record_url_filtered(&url, "no host");
            continue;
        }
        if is_blocked(&domain, extra_blocked) {
            audit.record_url_filtered(&url, "blocked domain");
            continue;
        }
        kept.push(url);
    }
    kept
}

/// Cap URLs per domain to keep runs diverse; order is preserved.
pub fn dedupe_by_domain(
    urls: Vec<String>,
    max_per_domain: usize,
    audit: &RunAudit,
) -> Vec<String> {
    let mut domain_counts: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::new();

    for url in urls {
        let domain = normalize_domain(&url);
        let count = domain_counts.entry(domain).or_insert(0);
        if *count < max_per_domain {
            *count += 1;
            kept.push(url);
        } else {
            audit.record_url_filtered(&url, "per-domain cap reached");
        }
    }

    kept
}
