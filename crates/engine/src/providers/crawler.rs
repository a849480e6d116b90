use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use deepresearch_common::types::Entity;
use deepresearch_fetch::ContentFetcher;

use super::{ProviderError, SearchBackend};

/// Headless crawler variant of the search capability. It contributes when
/// the refined query carries explicit URLs (seed pages, mandatory regulatory
/// sources injected by the plan): each URL is fetched and returned as an
/// already-enriched entity.
pub struct CrawlerProvider {
    fetcher: Arc<ContentFetcher>,
}

impl CrawlerProvider {
    pub fn new(fetcher: Arc<ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

/// Pull literal URLs out of a query string.
fn extract_urls(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(|token| token.trim_end_matches([',', ')', ']', '.']).to_string())
        .collect()
}

impl SearchBackend for CrawlerProvider {
    fn name(&self) -> &'static str {
        "crawler"
    }

    fn rps(&self) -> f64 {
        1.0
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
            let urls = extract_urls(query);
            let mut entities = Vec::new();

            for url in urls.into_iter().take(max_results) {
                match self.fetcher.fetch(&url).await {
                    Ok(page) => {
                        let title = page
                            .content
                            .chars()
                            .take(80)
                            .collect::<String>()
                            .trim()
                            .to_string();
                        let snippet: String = page.content.chars().take(300).collect();
                        let mut entity = Entity::new(&url, &title, &snippet, "crawler");
                        entity.content = Some(page.content);
                        entities.push(entity);
                    }
                    Err(e) => {
                        // Individual page failures degrade; the fan-out layer
                        // records them against the URL.
                        tracing::warn!(url = %url, error = %e, "Crawler page fetch failed");
                    }
                }
            }

            Ok(entities)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_urls_from_query() {
        let urls = extract_urls(
            "drone rules https://easa.europa.eu/sora and https://faa.gov/uas, plus text",
        );
        assert_eq!(
            urls,
            vec![
                "https://easa.europa.eu/sora".to_string(),
                "https://faa.gov/uas".to_string(),
            ]
        );
    }

    #[test]
    fn test_plain_query_has_no_urls() {
        assert!(extract_urls("effects of climate change on wheat yields").is_empty());
    }
}
