use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::cache::PageCache;
use crate::extract::{extract_html_content, host_of};
use crate::stealth;

/// Tuning knobs for the content fetcher.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Page load timeout.
    pub load_timeout: Duration,
    /// Additional idle budget for the response body.
    pub idle_timeout: Duration,
    /// Politeness delay bounds between requests to the same host.
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub cache_ttl: Duration,
    /// Max pages held in the response cache.
    pub cache_max_pages: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10),
            min_delay_ms: 500,
            max_delay_ms: 2_000,
            cache_ttl: Duration::from_secs(3_600),
            cache_max_pages: 512,
        }
    }
}

/// A fetched and extracted page.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub url: String,
    pub content: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub cached: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Timed out fetching {0}")]
    Timeout(String),
}

impl FetchError {
    /// Failure kind recorded in the access-failure table.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_error",
            Self::Status(s) if *s == 429 => "rate_limited",
            Self::Status(s) if *s >= 500 => "server_error",
            Self::Status(_) => "client_error",
            Self::UnsupportedContent(_) => "unsupported_content",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Fetches full page content with stealth: rotating user agents, a realistic
/// browser header set, per-host concurrency of 1, and a randomized
/// politeness delay. Failures never abort a session — callers record an
/// access failure and keep the entity's snippet.
pub struct ContentFetcher {
    http: reqwest::Client,
    cache: RwLock<PageCache>,
    host_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    config: FetchConfig,
}

impl ContentFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();

        Self {
            http,
            cache: RwLock::new(PageCache::new(config.cache_ttl, config.cache_max_pages)),
            host_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Fetch a URL and extract its main text.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        // Cache first — a hit skips the politeness delay entirely.
        {
            let cache = self.cache.read().await;
            if let Some((content, status_code, content_type)) = cache.get(url) {
                return Ok(FetchedPage {
                    url: url.to_string(),
                    content,
                    status_code,
                    content_type,
                    cached: true,
                });
            }
        }

        let host = host_of(url);

        // Per-host serialization: at most one in-flight request per host.
        let host_lock = {
            let mut locks = self.host_locks.lock().await;
            Arc::clone(locks.entry(host.clone()).or_default())
        };
        let _guard = host_lock.lock().await;

        let delay =
            stealth::politeness_delay_ms(&host, self.config.min_delay_ms, self.config.max_delay_ms);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        tracing::debug!(url = %url, host = %host, "Fetching page");

        let start = std::time::Instant::now();
        let timeout = self.config.load_timeout + self.config.idle_timeout;

        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .header("User-Agent", stealth::pick_user_agent(&host))
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Upgrade-Insecure-Requests", "1")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(url.to_string())
                } else {
                    FetchError::Http(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            metrics::counter!("fetch.request.errors", "host" => host.clone()).increment(1);
            return Err(FetchError::Status(status));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // Only text-based responses are useful downstream.
        if let Some(ref ct) = content_type {
            let ct_lower = ct.to_lowercase();
            let is_text = ct_lower.contains("text/")
                || ct_lower.contains("application/json")
                || ct_lower.contains("application/xml")
                || ct_lower.contains("application/xhtml");
            if !is_text {
                tracing::warn!(url = %url, content_type = %ct, "Rejecting non-text content");
                return Err(FetchError::UnsupportedContent(ct.clone()));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let content = if content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html"))
        {
            extract_html_content(&body)
        } else {
            body
        };

        {
            let mut cache = self.cache.write().await;
            cache.insert(url, content.clone(), status, content_type.clone());
        }

        let latency = start.elapsed().as_secs_f64();
        metrics::histogram!("fetch.request.latency", "host" => host).record(latency);

        Ok(FetchedPage {
            url: url.to_string(),
            content,
            status_code: status,
            content_type,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(FetchError::Status(503).kind(), "server_error");
        assert_eq!(FetchError::Status(429).kind(), "rate_limited");
        assert_eq!(FetchError::Status(404).kind(), "client_error");
        assert_eq!(FetchError::Timeout("u".into()).kind(), "timeout");
    }

    #[tokio::test]
    async fn test_cache_short_circuits_fetch() {
        let fetcher = ContentFetcher::new(FetchConfig::default());
        {
            let mut cache = fetcher.cache.write().await;
            cache.insert(
                "https://example.com/cached",
                "cached content".into(),
                200,
                Some("text/html".into()),
            );
        }

        // A differently-spelled URL for the same page still hits.
        let page = fetcher
            .fetch("HTTPS://EXAMPLE.COM/cached#section")
            .await
            .unwrap();
        assert!(page.cached);
        assert_eq!(page.content, "cached content");
    }
}
