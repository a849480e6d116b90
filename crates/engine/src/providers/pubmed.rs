use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const ESUMMARY_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

#[derive(Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Deserialize)]
struct ESummaryResponse {
    result: serde_json::Map<String, serde_json::Value>,
}

/// Medical literature search via the NCBI E-utilities (PubMed). Keyless;
/// NCBI asks for at most 3 requests per second, and each search costs two.
pub struct PubMedProvider {
    http: reqwest::Client,
}

impl PubMedProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .query(query)
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

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

impl Default for PubMedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchBackend for PubMedProvider {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    fn rps(&self) -> f64 {
        // Two E-utilities calls per search.
        1.5
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
            let retmax = max_results.to_string();
            let search: ESearchResponse = self
                .get_json(
                    ESEARCH_URL,
                    &[
                        ("db", "pubmed"),
                        ("term", query),
                        ("retmax", retmax.as_str()),
                        ("retmode", "json"),
                        ("sort", "relevance"),
                    ],
                )
                .await?;

            let ids = search.esearchresult.idlist;
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let id_list = ids.join(",");
            let summaries: ESummaryResponse = self
                .get_json(
                    ESUMMARY_URL,
                    &[("db", "pubmed"), ("id", id_list.as_str()), ("retmode", "json")],
                )
                .await?;

            let entities = ids
                .iter()
                .filter_map(|id| {
                    let record = summaries.result.get(id)?;
                    let title = record.get("title")?.as_str()?.to_string();
                    let url = format!("https://pubmed.ncbi.nlm.nih.gov/{}/", id);
                    let snippet = record
                        .get("source")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();

                    let mut entity = Entity::new(&url, &title, snippet, "pubmed");
                    entity.published = record
                        .get("pubdate")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    entity.extensions.insert("pmid".into(), id.as_str().into());
                    Some(entity)
                })
                .collect();

            Ok(entities)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_esearch_response() {
        let json = r#"{
            "header": {"type": "esearch"},
            "esearchresult": {"count": "2", "retmax": "2", "idlist": ["38012345", "37654321"]}
        }"#;
        let parsed: ESearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.esearchresult.idlist.len(), 2);
    }

    #[test]
    fn test_parse_esummary_records() {
        let json = r#"{
            "result": {
                "uids": ["38012345"],
                "38012345": {"uid": "38012345", "title": "Aspirin outcomes", "pubdate": "2024 Jan", "source": "Lancet"}
            }
        }"#;
        let parsed: ESummaryResponse = serde_json::from_str(json).unwrap();
        let record = parsed.result.get("38012345").unwrap();
        assert_eq!(record["title"], "Aspirin outcomes");
    }
}
