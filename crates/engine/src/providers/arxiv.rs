use std::future::Future;
use std::pin::Pin;

use scraper::{Html, Selector};

use deepresearch_common::types::Entity;

use super::{ProviderError, SearchBackend};

const ARXIV_QUERY_URL: &str = "https://export.arxiv.org/api/query";

/// Preprint search via the arXiv Atom API. Keyless; arXiv asks for no more
/// than one request every three seconds.
pub struct ArxivProvider {
    http: reqwest::Client,
}

impl ArxivProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for ArxivProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull entries out of the Atom feed. The lenient HTML parser handles the
/// XML fine for the flat tag structure arXiv returns.
fn parse_atom_feed(feed: &str) -> Vec<Entity> {
    let document = Html::parse_document(feed);

    let entry_sel = Selector::parse("entry").unwrap();
    let id_sel = Selector::parse("id").unwrap();
    let title_sel = Selector::parse("title").unwrap();
    let summary_sel = Selector::parse("summary").unwrap();
    let published_sel = Selector::parse("published").unwrap();

    let text_of = |entry: &scraper::ElementRef<'_>, sel: &Selector| {
        entry
            .select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    };

    document
        .select(&entry_sel)
        .filter_map(|entry| {
            let url = text_of(&entry, &id_sel)?;
            if url.is_empty() {
                return None;
            }
            let title = text_of(&entry, &title_sel).unwrap_or_else(|| url.clone());
            let summary = text_of(&entry, &summary_sel).unwrap_or_default();

            let mut entity = Entity::new(&url, &title, &summary, "arxiv");
            entity.published = text_of(&entry, &published_sel);
            Some(entity)
        })
        .collect()
}

impl SearchBackend for ArxivProvider {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn rps(&self) -> f64 {
        0.33
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
            let search_query = format!("all:{}", query);
            let max = max_results.to_string();
            let response = self
                .http
                .get(ARXIV_QUERY_URL)
                .query(&[
                    ("search_query", search_query.as_str()),
                    ("max_results", max.as_str()),
                    ("sortBy", "relevance"),
                ])
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

            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::Http(e.to_string()))?;

            Ok(parse_atom_feed(&body))
        })
    }
}
