use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const S2_SEARCH_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";

#[derive(Deserialize)]
struct S2Response {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Deserialize)]
struct S2Paper {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    r#abstract: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default, rename = "citationCount")]
    citation_count: Option<u64>,
    #[serde(default, rename = "externalIds")]
    external_ids: Option<serde_json::Value>,
}

/// Academic paper search via the Semantic Scholar Graph API. Works without a
/// key at a lower rate; a key raises the allowance.
pub struct SemanticScholarProvider {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl SemanticScholarProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

impl SearchBackend for SemanticScholarProvider {
    fn name(&self) -> &'static str {
        "semantic_scholar"
    }

    fn rps(&self) -> f64 {
        if self.api_key.is_some() {
            1.0
        } else {
            0.3
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let limit = max_results.to_string();
            let mut request = self.http.get(S2_SEARCH_URL).query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("fields", "title,abstract,url,year,citationCount,externalIds"),
            ]);
            if let Some(key) = self.api_key.as_deref() {
                request = request.header("x-api-key", key);
            }

            let response = request
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
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let parsed: S2Response = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(parsed
                .data
                .into_iter()
                .filter_map(|paper| {
                    let url = paper.url?;
                    let title = paper.title.unwrap_or_else(|| url.clone());
                    let snippet = paper.r#abstract.unwrap_or_default();
                    let mut entity = Entity::new(&url, &title, &snippet, "semantic_scholar");
                    entity.published = paper.year.map(|y| y.to_string());
                    if let Some(count) = paper.citation_count {
                        entity
                            .extensions
                            .insert("citation_count".into(), count.into());
                    }
                    if let Some(ids) = paper.external_ids {
                        entity.extensions.insert("external_ids".into(), ids);
                    }
                    Some(entity)
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s2_response() {
        let json = r#"{
            "total": 2,
            "data": [
                {"paperId": "p1", "title": "Wheat under warming", "url": "https://www.semanticscholar.org/paper/p1",
                 "abstract": "We study wheat.", "year": 2021, "citationCount": 40,
                 "externalIds": {"DOI": "10.1000/x"}},
                {"paperId": "p2", "title": "No URL paper"}
            ]
        }"#;
        let parsed: S2Response = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].year, Some(2021));
        assert!(parsed.data[1].url.is_none());
    }

    #[test]
    fn test_keyless_operation_is_slower() {
        let keyless = SemanticScholarProvider::new(None);
        let keyed = SemanticScholarProvider::new(Some("k".into()));
        assert!(keyless.is_available());
        assert!(keyless.rps() < keyed.rps());
    }
}
