//! Search provider front end. The pipeline consumes a finite, pre-triaged
//! set of result URLs from whichever provider the run selects; query
//! expansion happens upstream of this crate.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::TARGET_WEB_REQUEST;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// A search failure the pipeline can react to: credential problems abort the
/// run, everything else is absorbed per query.
#[derive(Debug)]
pub enum SearchError {
    Unauthorized,
    Failed(String),
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::Unauthorized => write!(f, "search provider rejected credentials"),
            SearchError::Failed(msg) => write!(f, "search failed: {}", msg),
        }
    }
}

impl std::error::Error for SearchError {}

#[derive(Debug, Clone)]
pub enum SearchProvider {
    Serper(SerperProvider),
    /// Fixed result list, used for seeded runs and tests.
    Static(Vec<SearchHit>),
}

impl SearchProvider {
    pub fn name(&self) -> &'static str {
        match self {
            SearchProvider::Serper(_) => "serper",
            SearchProvider::Static(_) => "static",
        }
    }

    pub async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError> {
        match self {
            SearchProvider::Serper(provider) => provider.search(query, num_results).await,
            SearchProvider::Static(hits) => Ok(hits.iter().take(num_results).cloned().collect()),
        }
    }
}

/// Serper.dev search API client.
#[derive(Debug, Clone)]
pub struct SerperProvider {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerperProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = env::var("SERPER_API_KEY")
            .map_err(|_| anyhow!("SERPER_API_KEY environment variable required"))?;
        Ok(SerperProvider { client, api_key })
    }

    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError> {
        debug!(target: TARGET_WEB_REQUEST, "Issuing search query: {}", query);

        let body = serde_json::json!({ "q": query, "num": num_results });
        let request = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send();

        let response = match timeout(SEARCH_TIMEOUT, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(SearchError::Failed(e.to_string())),
            Err(_) => return Err(SearchError::Failed("search request timed out".to_string())),
        };

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SearchError::Unauthorized);
        }
        if !status.is_success() {
            warn!(target: TARGET_WEB_REQUEST, "Search returned status {} for query: {}", status, query);
            return Err(SearchError::Failed(format!("status {}", status)));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Failed(format!("malformed search response: {}", e)))?;

        Ok(parsed
            .organic
            .into_iter()
            .map(|hit| SearchHit {
                url: hit.link,
                title: hit.title,
                snippet: hit.snippet,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_caps_results() {
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| SearchHit {
                url: format!("https://example{}.com", i),
                title: String::new(),
                snippet: String::new(),
            })
            .collect();
        let provider = SearchProvider::Static(hits);
        let results = provider.search("anything", 4).await.unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].url, "https://example0.com");
    }

    #[test]
    fn test_serper_response_parsing() {
        let raw = r#"{"organic": [{"link": "https://a.com", "title": "A", "snippet": "about a"}, {"link": "https://b.com"}], "credits": 1}"#;
        let parsed: SerperResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.organic.len(), 2);
        assert_eq!(parsed.organic[1].title, "");
    }
}
