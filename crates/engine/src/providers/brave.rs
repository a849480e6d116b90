use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    url: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

/// General web search via the Brave Search API.
pub struct BraveProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl BraveProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

impl SearchBackend for BraveProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    fn rps(&self) -> f64 {
        1.0
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| ProviderError::Auth("BRAVE_API_KEY not set".into()))?;

            let count = max_results.to_string();
            let response = self
                .http
                .get(BRAVE_SEARCH_URL)
                .header("X-Subscription-Token", api_key)
                .header("Accept", "application/json")
                .query(&[("q", query), ("count", count.as_str())])
                .send()
                .await
                .map_err(|e| ProviderError::Http(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok());
                return Err(ProviderError::RateLimited { retry_after });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(ProviderError::Auth("Brave rejected API key".into()));
            }
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let parsed: BraveResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(parsed
                .web
                .map(|w| w.results)
                .unwrap_or_default()
                .into_iter()
                .map(|r| {
                    let mut entity = Entity::new(&r.url, &r.title, &r.description, "brave");
                    entity.published = r.page_age;
                    entity
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_brave_response() {
        let json = r#"{
            "web": {
                "results": [
                    {"url": "https://example.com/x", "title": "X", "description": "about x", "page_age": "2024-01-02"}
                ]
            }
        }"#;
        let parsed: BraveResponse = serde_json::from_str(json).unwrap();
        let results = parsed.web.unwrap().results;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_age.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn test_parse_empty_response() {
        let parsed: BraveResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.web.is_none());
    }
}
