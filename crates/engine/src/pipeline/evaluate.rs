use std::future::Future;
use std::pin::Pin;

use deepresearch_common::api::ProgressEvent;
use deepresearch_common::types::{
    ResearchSession, SaturationMetrics, SaturationWeights, StopReason,
};
use deepresearch_common::{ResearchError, Result};

use super::text::top_content_terms;
use super::{NodeContext, NodeOutcome, PipelineNode};

/// Groups with agreement below this feed gap terms into the next cycle.
const LOW_COVERAGE_AGREEMENT: f64 = 0.5;

/// Saturation metrics as a pure function of the session's cumulative history.
pub fn compute_saturation(session: &ResearchSession, weights: SaturationWeights) -> SaturationMetrics {
    let new_entity_ratio = if session.entities.is_empty() {
        0.0
    } else {
        session.new_entities_this_cycle as f64 / session.entities.len() as f64
    };

    let new_fact_ratio = if session.facts.is_empty() {
        0.0
    } else {
        session.new_facts_this_cycle as f64 / session.facts.len() as f64
    };

    let cross_agreement = if session.fact_groups.is_empty() {
        0.0
    } else {
        session.fact_groups.iter().map(|g| g.agreement).sum::<f64>()
            / session.fact_groups.len() as f64
    };

    let overall = (1.0 - weights.new_entity * new_entity_ratio - weights.new_fact * new_fact_ratio
        + weights.agreement * cross_agreement)
        .clamp(0.0, 1.0);

    SaturationMetrics {
        new_entity_ratio,
        new_fact_ratio,
        cross_agreement,
        overall,
    }
}

/// Evaluate node: recompute saturation, decide whether to loop Collect or
/// stop, and always record a stop reason when stopping.
pub struct EvaluateNode;

impl PipelineNode for EvaluateNode {
    fn name(&self) -> &'static str {
        "evaluate"
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
                .ok_or_else(|| ResearchError::Internal("evaluate reached without a plan".into()))?;

            session.cycle += 1;
            session.saturation = compute_saturation(session, plan.weights);

            ctx.emit(ProgressEvent::Stats {
                cycle: session.cycle,
                entities_found: session.entities.len(),
                facts_extracted: session.facts.len(),
                saturation: session.saturation.overall,
            });

            tracing::info!(
                session_id = %session.id,
                cycle = session.cycle,
                saturation = session.saturation.overall,
                threshold = plan.saturation_threshold,
                "Cycle evaluated"
            );

            let no_progress =
                session.new_entities_this_cycle == 0 && session.new_facts_this_cycle == 0;
            let safety = &ctx.settings.safety;
            let budget_exhausted = session.entities.len() >= safety.max_entities
                || session.llm_tokens_used >= safety.max_llm_tokens
                || session.fetch_seconds_used >= safety.max_fetch_seconds;

            let stop_reason = if session.cycle >= plan.min_cycles
                && session.saturation.overall >= plan.saturation_threshold
            {
                Some(StopReason::SaturationReached)
            } else if session.cycle >= plan.max_cycles {
                Some(StopReason::MaxCycles)
            } else if budget_exhausted {
                // Non-cycle budget exhaustion: the session cannot progress
                // further within budget.
                Some(StopReason::NoProgress)
            } else if no_progress && session.cycle > 1 {
                Some(StopReason::NoProgress)
            } else {
                None
            };

            if let Some(reason) = stop_reason {
                session.stop_reason = Some(reason);
                tracing::info!(
                    session_id = %session.id,
                    stop_reason = reason.as_str(),
                    "Research loop stopping"
                );
                return Ok(NodeOutcome::StopAndSynthesize);
            }

            // Loop back: widen the query with terms from low-coverage groups.
            session.gap_terms = gap_terms(session);
            if !session.gap_terms.is_empty() {
                for term in session.gap_terms.clone() {
                    if !session.refined_query.to_lowercase().contains(&term) {
                        session.refined_query.push(' ');
                        session.refined_query.push_str(&term);
                    }
                }
                tracing::info!(
                    session_id = %session.id,
                    gap_terms = ?session.gap_terms,
                    "Looping collect with gap terms"
                );
            }

            Ok(NodeOutcome::LoopCollect)
        })
    }
}

/// Terms from fact groups whose coverage is still thin.
fn gap_terms(session: &ResearchSession) -> Vec<String> {
    let low_coverage_ids: std::collections::HashSet<_> = session
        .fact_groups
        .iter()
        .filter(|g| g.agreement < LOW_COVERAGE_AGREEMENT)
        .flat_map(|g| g.fact_ids.iter().copied())
        .collect();

    let statements: Vec<&str> = session
        .facts
        .iter()
        .filter(|f| low_coverage_ids.contains(&f.id))
        .map(|f| f.statement.as_str())
        .collect();

    top_content_terms(&statements, 3)
}
