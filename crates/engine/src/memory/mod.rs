pub mod embeddings;
pub mod structured;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use deepresearch_common::types::{ResearchDomain, ResearchSession};
use deepresearch_common::Result;

pub use embeddings::EmbeddingClient;
pub use structured::{SessionSummary, SourceEffectiveness, StructuredStore};
pub use vector::{DocChunk, VectorStore};

/// Unified facade over the vector and structured stores. This is the only
/// memory interface the pipeline sees.
pub struct MemoryStore {
    structured: StructuredStore,
    vectors: VectorStore,
}

impl MemoryStore {
    /// Open both sub-stores under the data directory.
    pub async fn open(data_dir: &Path, embedder: Option<Arc<EmbeddingClient>>) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            deepresearch_common::ResearchError::Store(format!(
                "cannot create data dir {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let structured = StructuredStore::open(&data_dir.join("research.db"))
            .await
            .map_err(deepresearch_common::ResearchError::from)?;

        let vectors = VectorStore::open(&data_dir.join("vectors"), embedder).map_err(|e| {
            deepresearch_common::ResearchError::Store(format!("vector index: {}", e))
        })?;

        Ok(Self {
            structured,
            vectors,
        })
    }

    /// Fully in-memory store for tests.
    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            structured: StructuredStore::open_in_memory()
                .await
                .map_err(deepresearch_common::ResearchError::from)?,
            vectors: VectorStore::in_memory(None),
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        self.structured
            .health_check()
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    // --- Planning inputs -------------------------------------------------

    /// Effectiveness scores (source → EMA) for a domain.
    pub async fn effectiveness(&self, domain: ResearchDomain) -> Result<HashMap<String, f64>> {
        let table = self
            .structured
            .effectiveness_for_domain(domain)
            .await
            .map_err(deepresearch_common::ResearchError::from)?;
        Ok(table.into_iter().map(|(k, v)| (k, v.ema)).collect())
    }

    /// Prior sessions in the same domain, newest first.
    pub async fn similar_sessions(
        &self,
        domain: ResearchDomain,
        limit: u32,
    ) -> Result<Vec<SessionSummary>> {
        self.structured
            .recent_sessions(domain, limit)
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    /// Persisted playbook override for a domain.
    pub async fn domain_override(
        &self,
        domain: ResearchDomain,
    ) -> Result<Option<serde_json::Value>> {
        self.structured
            .domain_override(domain)
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    pub async fn set_domain_override(
        &self,
        domain: ResearchDomain,
        config: &serde_json::Value,
    ) -> Result<()> {
        self.structured
            .set_domain_override(domain, config)
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    // --- Collect-side failure memory -------------------------------------

    pub async fn record_access_failure(&self, url: &str, provider: &str, kind: &str) {
        if let Err(e) = self
            .structured
            .record_access_failure(url, provider, kind)
            .await
        {
            tracing::warn!(url = %url, error = %e, "Failed to persist access failure");
        }
    }

    /// Known-dead URLs (3+ recorded failures).
    pub async fn known_failed_urls(&self) -> HashSet<String> {
        self.structured
            .known_failed_urls(3)
            .await
            .unwrap_or_default()
    }

    // --- Session archive --------------------------------------------------

    pub async fn save_session(&self, session: &ResearchSession) -> Result<()> {
        self.structured
            .save_session(session)
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    pub async fn load_report_json(&self, session_id: &str) -> Result<Option<String>> {
        self.structured
            .load_report_json(session_id)
            .await
            .map_err(deepresearch_common::ResearchError::from)
    }

    // --- Post-run learning ------------------------------------------------

    /// Fold the session's outcome into the effectiveness table. Called once
    /// per session at terminal phase: a source observed 1.0 contributed at
    /// least one fact to the final report, 0.0 was queried without
    /// contributing.
    pub async fn learn_effectiveness(
        &self,
        domain: ResearchDomain,
        observations: &[(String, f64)],
    ) -> Result<()> {
        for (source, observed) in observations {
            self.structured
                .update_effectiveness(domain, source, *observed)
                .await
                .map_err(deepresearch_common::ResearchError::from)?;
        }
        tracing::info!(
            domain = domain.as_str(),
            sources = observations.len(),
            "Effectiveness table updated"
        );
        Ok(())
    }

    // --- Vector store ------------------------------------------------------

    pub async fn store_document(&self, url: &str, title: &str, text: &str) {
        self.vectors.store_document(url, title, text).await;
    }

    pub async fn search_similar(&self, query: &str, k: usize) -> Vec<(DocChunk, f32)> {
        self.vectors.search_similar(query, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_learning_step_feeds_planning() {
        let memory = MemoryStore::in_memory().await.unwrap();

        memory
            .learn_effectiveness(
                ResearchDomain::Academic,
                &[("arxiv".to_string(), 1.0), ("tavily".to_string(), 0.0)],
            )
            .await
            .unwrap();

        let scores = memory.effectiveness(ResearchDomain::Academic).await.unwrap();
        assert!(scores["arxiv"] > scores["tavily"]);
    }

    #[tokio::test]
    async fn test_known_failed_urls_threshold() {
        let memory = MemoryStore::in_memory().await.unwrap();

        for _ in 0..2 {
            memory
                .record_access_failure("https://flaky.example", "crawler", "timeout")
                .await;
        }
        assert!(!memory.known_failed_urls().await.contains("https://flaky.example"));

        memory
            .record_access_failure("https://flaky.example", "crawler", "timeout")
            .await;
        assert!(memory.known_failed_urls().await.contains("https://flaky.example"));
    }
}
