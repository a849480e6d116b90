use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::{ResearchPlan, ResearchSession};
use deepresearch_common::Result;

use super::{NodeContext, NodeOutcome, PipelineNode};
use crate::domain::load_domain_config;

/// Plan node: turn the refined query, domain playbook and memory into an
/// ordered provider list plus stopping parameters.
///
/// Protocol invariant: memory is consulted BEFORE the plan is assembled —
/// effectiveness scores and prior sessions are inputs to provider ordering,
/// never an afterthought.
pub struct PlanNode;

impl PipelineNode for PlanNode {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            // Memory first.
            let effectiveness = ctx.memory.effectiveness(session.domain).await?;
            let prior = ctx.memory.similar_sessions(session.domain, 5).await?;
            if !prior.is_empty() {
                tracing::info!(
                    session_id = %session.id,
                    prior_sessions = prior.len(),
                    "Consulted prior sessions in this domain"
                );
            }

            let domain_config =
                load_domain_config(&ctx.settings.data_dir, session.domain, &ctx.memory).await;

            // Mandatory inclusions ride along as crawler seeds.
            if !domain_config.mandatory_sources.is_empty() {
                let seeds: Vec<String> = domain_config
                    .mandatory_sources
                    .iter()
                    .map(|host| format!("https://{}", host.trim_start_matches("https://")))
                    .collect();
                session.refined_query = format!("{} {}", session.refined_query, seeds.join(" "));
            }

            let ordered = ctx.fleet.select(&domain_config, &effectiveness);
            let providers: Vec<String> = ordered.iter().map(|p| p.name().to_string()).collect();

            if providers.is_empty() {
                tracing::warn!(session_id = %session.id, "No providers available for plan");
            }

            let plan = ResearchPlan {
                providers,
                sources_per_provider: ctx.settings.safety.sources_per_provider,
                saturation_threshold: domain_config.saturation_threshold,
                min_cycles: domain_config.min_cycles,
                max_cycles: ctx.settings.safety.max_cycles,
                enrich_top_k: ctx.settings.safety.enrich_top_k,
                verification: domain_config.verification.clone(),
                weights: domain_config.saturation_weights,
            };

            tracing::info!(
                session_id = %session.id,
                providers = ?plan.providers,
                threshold = plan.saturation_threshold,
                min_cycles = plan.min_cycles,
                "Research plan ready"
            );

            session.plan = Some(plan);
            Ok(NodeOutcome::Advance)
        })
    }
}
