use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

/// General web search via the Tavily API.
pub struct TavilyProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl TavilyProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

impl SearchBackend for TavilyProvider {
    fn name(&self) -> &'static str {
        "tavily"
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
                .ok_or_else(|| ProviderError::Auth("TAVILY_API_KEY not set".into()))?;

            let response = self
                .http
                .post(TAVILY_SEARCH_URL)
                .json(&TavilyRequest {
                    api_key,
                    query,
                    max_results,
                    search_depth: "basic",
                })
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
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::Auth("Tavily rejected API key".into()));
            }
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let parsed: TavilyResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(parsed
                .results
                .into_iter()
                .map(|r| {
                    let mut entity = Entity::new(&r.url, &r.title, &r.content, "tavily");
                    entity.score = r.score;
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
    fn test_parse_tavily_response() {
        let json = r#"{
            "query": "wheat yields",
            "results": [
                {"url": "https://example.org/a", "title": "A", "content": "snippet a", "score": 0.91},
                {"url": "https://example.org/b", "title": "B", "content": ""}
            ]
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].score, Some(0.91));
    }

    #[test]
    fn test_unavailable_without_key() {
        assert!(!TavilyProvider::new(None).is_available());
        assert!(TavilyProvider::new(Some("tvly-key".into())).is_available());
    }
}
