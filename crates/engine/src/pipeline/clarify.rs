use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::ResearchSession;
use deepresearch_common::Result;

use super::{NodeContext, NodeOutcome, PipelineNode};
use crate::domain;

/// Markers of a query that genuinely cannot be researched as-is.
const AMBIGUITY_MARKERS: &[&str] = &["stuff", "things", "something", "anything", "whatever"];

const MIN_QUERY_CHARS: usize = 12;

/// Is this query too under-specified to research? Policy is to prefer a
/// reasonable interpretation over blocking, so all three checks must point
/// the same way only loosely: a very short query or one made of filler words
/// parks the session; everything else proceeds.
fn needs_clarification(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.len() < MIN_QUERY_CHARS {
        return true;
    }

    // Noun proxy: at least one substantial word.
    let has_substantial_word = trimmed
        .split_whitespace()
        .any(|w| w.chars().filter(|c| c.is_alphanumeric()).count() > 3);
    if !has_substantial_word {
        return true;
    }

    let lower = trimmed.to_lowercase();
    let marker_hits = AMBIGUITY_MARKERS
        .iter()
        .filter(|m| lower.split_whitespace().any(|w| w == **m))
        .count();
    let word_count = lower.split_whitespace().count();

    // Filler-dominated short queries ("find me something about things").
    marker_hits >= 1 && word_count <= 6
}

/// Clarify node: detect under-specified queries and park them for approval;
/// otherwise pass the query through unchanged. Also pins the session's
/// domain, so Plan downstream works from a classified query.
pub struct ClarifyNode;

impl PipelineNode for ClarifyNode {
    fn name(&self) -> &'static str {
        "clarify"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            session.domain = domain::classify(&session.query, &ctx.router, session.privacy).await;
            tracing::info!(
                session_id = %session.id,
                domain = session.domain.as_str(),
                "Domain detected"
            );

            if needs_clarification(&session.query) {
                session.clarification = Some(format!(
                    "The query \"{}\" is too broad to research well. Add a subject, a timeframe, \
                     or the specific question to answer — or approve to proceed with a best-effort \
                     interpretation.",
                    session.query.trim()
                ));
                tracing::info!(session_id = %session.id, "Query needs clarification");
                return Ok(NodeOutcome::AwaitApproval);
            }

            session.refined_query = session.query.clone();
            Ok(NodeOutcome::Advance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_query_needs_clarification() {
        assert!(needs_clarification("drones?"));
        assert!(needs_clarification("  hi  "));
    }

    #[test]
    fn test_filler_query_needs_clarification() {
        assert!(needs_clarification("find me something interesting"));
        assert!(needs_clarification("stuff about things please"));
    }

    #[test]
    fn test_reasonable_query_proceeds() {
        assert!(!needs_clarification("effects of climate change on wheat yields"));
        assert!(!needs_clarification("SORA compliance requirements for urban drone flights"));
    }

    #[test]
    fn test_long_query_with_marker_still_proceeds() {
        // Long enough to carry real signal despite a filler word.
        assert!(!needs_clarification(
            "explain the things a SORA applicant must document for EASA specific category approval"
        ));
    }
}
