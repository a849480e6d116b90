use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;

use deepresearch_common::api::ProgressEvent;
use deepresearch_common::types::{Entity, ResearchSession};
use deepresearch_common::{ResearchError, Result};

use super::{NodeContext, NodeOutcome, PipelineNode};

/// Collect node: fan out to the planned providers concurrently, merge results
/// under a deterministic key, then enrich the best new entities with full
/// content.
pub struct CollectNode;

impl PipelineNode for CollectNode {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let plan = session
                .plan
                .clone()
                .ok_or_else(|| ResearchError::Internal("collect reached without a plan".into()))?;

            let parallelism = ctx.settings.safety.parallel_providers;
            let selected: Vec<_> = plan
                .providers
                .iter()
                .filter_map(|name| ctx.fleet.get(name))
                .take(parallelism.min(plan.providers.len()))
                .collect();

            // Provider fan-out. Priority is the plan order, used below to
            // resolve merge conflicts.
            let mut join_set = JoinSet::new();
            for (priority, provider) in selected.iter().enumerate() {
                let provider = Arc::clone(provider);
                let query = session.refined_query.clone();
                let cancelled = Arc::clone(&ctx.cancelled);
                let max_results = plan.sources_per_provider;

                join_set.spawn(async move {
                    let outcome = provider.search(&query, max_results, &cancelled).await;
                    (priority, outcome)
                });
            }

            let mut gathered: Vec<(usize, Entity)> = Vec::new();
            let mut was_cancelled = false;

            while let Some(joined) = join_set.join_next().await {
                let Ok((priority, outcome)) = joined else {
                    tracing::error!("Provider fan-out task panicked");
                    continue;
                };
                match outcome {
                    Ok(results) => {
                        if let Some(reason) = results.skipped {
                            session.providers_skipped += 1;
                            tracing::info!(
                                session_id = %session.id,
                                provider = %results.provider,
                                reason,
                                "Provider skipped this cycle"
                            );
                        } else {
                            session.record_provider_queried(&results.provider);
                        }
                        gathered.extend(results.entities.into_iter().map(|e| (priority, e)));
                    }
                    Err(ResearchError::Cancelled) => was_cancelled = true,
                    Err(e) => return Err(e),
                }
            }

            // Deterministic merge: key by normalized URL, conflicts resolved
            // by plan priority then provider score, final ordering by key.
            // Which provider answered first never matters.
            let mut merged: HashMap<String, (usize, Entity)> = HashMap::new();
            for (priority, entity) in gathered {
                match merged.get(&entity.url) {
                    Some((existing_priority, existing)) => {
                        let better_priority = priority < *existing_priority;
                        let same_priority_better_score = priority == *existing_priority
                            && entity.score.unwrap_or(0.0) > existing.score.unwrap_or(0.0);
                        if better_priority || same_priority_better_score {
                            merged.insert(entity.url.clone(), (priority, entity));
                        }
                    }
                    None => {
                        merged.insert(entity.url.clone(), (priority, entity));
                    }
                }
            }

            let mut ordered: Vec<Entity> = merged.into_values().map(|(_, e)| e).collect();
            ordered.sort_by(|a, b| a.url.cmp(&b.url));

            let dead_urls = ctx.memory.known_failed_urls().await;
            let mut new_urls: Vec<String> = Vec::new();

            for entity in ordered {
                if session.entities.len() >= ctx.settings.safety.max_entities {
                    tracing::info!(session_id = %session.id, "Entity budget reached, stopping merge");
                    break;
                }
                if dead_urls.contains(&entity.url) {
                    tracing::debug!(url = %entity.url, "Skipping known-dead endpoint");
                    continue;
                }
                let url = entity.url.clone();
                if session.add_entity(entity) {
                    new_urls.push(url);
                }
            }

            session.new_entities_this_cycle = new_urls.len();
            tracing::info!(
                session_id = %session.id,
                cycle = session.cycle,
                new_entities = new_urls.len(),
                total_entities = session.entities.len(),
                "Collect fan-out merged"
            );

            // Cancellation checked only after merging: partial results
            // already gathered are preserved.
            if was_cancelled || ctx.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }

            self.enrich(ctx, session, &plan, &new_urls).await?;

            ctx.emit(ProgressEvent::Stats {
                cycle: session.cycle,
                entities_found: session.entities.len(),
                facts_extracted: session.facts.len(),
                saturation: session.saturation.overall,
            });

            Ok(NodeOutcome::Advance)
        })
    }
}

impl CollectNode {
    /// Fetch full content for the top-K new entities by provider score.
    async fn enrich(
        &self,
        ctx: &NodeContext,
        session: &mut ResearchSession,
        plan: &deepresearch_common::types::ResearchPlan,
        new_urls: &[String],
    ) -> Result<()> {
        if session.fetch_seconds_used >= ctx.settings.safety.max_fetch_seconds {
            tracing::info!(session_id = %session.id, "Fetch budget exhausted, skipping enrichment");
            return Ok(());
        }

        let mut candidates: Vec<(String, String, f64)> = session
            .entities
            .iter()
            .filter(|e| new_urls.contains(&e.url) && e.content.is_none())
            .map(|e| (e.url.clone(), e.provider.clone(), e.score.unwrap_or(0.0)))
            .collect();
        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        candidates.truncate(plan.enrich_top_k);

        let mut join_set = JoinSet::new();
        for (url, provider, _) in candidates {
            let fetcher = Arc::clone(&ctx.fetcher);
            join_set.spawn(async move {
                let start = std::time::Instant::now();
                let outcome = fetcher.fetch(&url).await;
                (url, provider, outcome, start.elapsed().as_secs())
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let Ok((url, provider, outcome, elapsed)) = joined else {
                continue;
            };
            session.fetch_seconds_used += elapsed;

            match outcome {
                Ok(page) if !page.content.is_empty() => {
                    ctx.memory
                        .store_document(
                            &url,
                            session
                                .entities
                                .iter()
                                .find(|e| e.url == url)
                                .map(|e| e.title.as_str())
                                .unwrap_or(""),
                            &page.content,
                        )
                        .await;
                    if let Some(entity) = session.entities.iter_mut().find(|e| e.url == url) {
                        entity.content = Some(page.content);
                    }
                }
                Ok(_) => {
                    // Empty extraction; the snippet stays.
                    session.fetch_failures += 1;
                }
                Err(e) => {
                    // A failed fetch never removes the entity.
                    tracing::warn!(url = %url, error = %e, "Enrichment fetch failed");
                    session.fetch_failures += 1;
                    ctx.memory.record_access_failure(&url, &provider, e.kind()).await;
                }
            }
        }

        Ok(())
    }
}
