use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const UNPAYWALL_SEARCH_URL: &str = "https://api.unpaywall.org/v2/search";

#[derive(Deserialize)]
struct UnpaywallResponse {
    #[serde(default)]
    results: Vec<UnpaywallHit>,
}

#[derive(Deserialize)]
struct UnpaywallHit {
    response: UnpaywallWork,
}

#[derive(Deserialize)]
struct UnpaywallWork {
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    best_oa_location: Option<OaLocation>,
}

#[derive(Deserialize)]
struct OaLocation {
    #[serde(default)]
    url_for_pdf: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Open-access resolver via the Unpaywall API. Enabled by a contact email,
/// which Unpaywall requires on every request.
pub struct UnpaywallProvider {
    http: reqwest::Client,
    email: Option<String>,
}

impl UnpaywallProvider {
    pub fn new(email: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            email,
        }
    }
}

impl SearchBackend for UnpaywallProvider {
    fn name(&self) -> &'static str {
        "unpaywall"
    }

    fn rps(&self) -> f64 {
        5.0
    }

    fn is_available(&self) -> bool {
        self.email.is_some()
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let email = self
                .email
                .as_deref()
                .ok_or_else(|| ProviderError::Auth("UNPAYWALL_EMAIL not set".into()))?;

            let response = self
                .http
                .get(UNPAYWALL_SEARCH_URL)
                .query(&[("query", query), ("email", email)])
                .send()
                .await
                .map_err(|e| ProviderError::Http(e.to_string()))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ProviderError::RateLimited { retry_after: None });
            }
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let parsed: UnpaywallResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            Ok(parsed
                .results
                .into_iter()
                .take(max_results)
                .filter_map(|hit| {
                    let work = hit.response;
                    // Prefer the PDF, fall back to the landing page, then DOI.
                    let url = work
                        .best_oa_location
                        .as_ref()
                        .and_then(|loc| loc.url_for_pdf.clone().or_else(|| loc.url.clone()))
                        .or_else(|| work.doi.as_ref().map(|d| format!("https://doi.org/{}", d)))?;

                    let title = work.title.unwrap_or_else(|| url.clone());
                    let mut entity = Entity::new(&url, &title, "", "unpaywall");
                    entity.published = work.year.map(|y| y.to_string());
                    if let Some(doi) = work.doi {
                        entity.extensions.insert("doi".into(), doi.into());
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
    fn test_parse_unpaywall_response() {
        let json = r#"{
            "results": [
                {"response": {
                    "doi": "10.1000/xyz",
                    "title": "Open access wheat study",
                    "year": 2022,
                    "best_oa_location": {"url_for_pdf": "https://repo.example/p.pdf", "url": "https://repo.example/p"}
                }},
                {"response": {"doi": "10.1000/no-oa", "title": "Closed work"}}
            ]
        }"#;
        let parsed: UnpaywallResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert!(parsed.results[1].response.best_oa_location.is_none());
    }

    #[test]
    fn test_unavailable_without_email() {
        assert!(!UnpaywallProvider::new(None).is_available());
        assert!(UnpaywallProvider::new(Some("research@example.org".into())).is_available());
    }
}
