use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const EXA_SEARCH_URL: &str = "https://api.exa.ai/search";

#[derive(Serialize)]
struct ExaRequest<'a> {
    query: &'a str,
    #[serde(rename = "numResults")]
    num_results: usize,
    contents: ExaContents,
}

#[derive(Serialize)]
struct ExaContents {
    text: bool,
}

#[derive(Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Deserialize)]
struct ExaResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<String>,
}

/// Neural web search via the Exa API.
pub struct ExaProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl ExaProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

impl SearchBackend for ExaProvider {
    fn name(&self) -> &'static str {
        "exa"
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
                .ok_or_else(|| ProviderError::Auth("EXA_API_KEY not set".into()))?;

            let response = self
                .http
                .post(EXA_SEARCH_URL)
                .header("x-api-key", api_key)
                .json(&ExaRequest {
                    query,
                    num_results: max_results,
                    contents: ExaContents { text: false },
                })
                .send()
                .await
                .map_err(|e| ProviderError::Http(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited { retry_after: None });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ProviderError::Auth("Exa rejected API key".into()));
            }
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let parsed: ExaResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(parsed
                .results
                .into_iter()
                .map(|r| {
                    let title = r.title.unwrap_or_else(|| r.url.clone());
                    let snippet: String = r
                        .text
                        .map(|t| t.chars().take(500).collect())
                        .unwrap_or_default();
                    let mut entity = Entity::new(&r.url, &title, &snippet, "exa");
                    entity.score = r.score;
                    entity.published = r.published_date;
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
    fn test_parse_exa_response() {
        let json = r#"{
            "results": [
                {"url": "https://example.ai/post", "title": "Post", "score": 0.42, "publishedDate": "2023-11-05"},
                {"url": "https://example.ai/untitled", "text": "body text"}
            ]
        }"#;
        let parsed: ExaResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].score, Some(0.42));
        assert!(parsed.results[1].title.is_none());
    }

    #[test]
    fn test_request_uses_camel_case_count() {
        let request = ExaRequest {
            query: "q",
            num_results: 7,
            contents: ExaContents { text: false },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["numResults"], 7);
    }
}
