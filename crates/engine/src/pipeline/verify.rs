use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::ResearchSession;
use deepresearch_common::{ResearchError, Result};

use super::{NodeContext, NodeOutcome, PipelineNode};
use crate::llm::{ChatMessage, LlmError, TaskComplexity};

/// Confidence multiplier applied to facts that fail re-extraction.
const DOWNGRADE_FACTOR: f64 = 0.5;

const VERIFY_SYSTEM_PROMPT: &str = "You check whether a source text supports a claim. \
Respond with exactly one word: yes or no.";

/// Verify node: for domains whose playbook requires it, re-fetch the primary
/// sources behind the top-confidence facts and re-run extraction; facts the
/// source no longer supports are downgraded.
pub struct VerifyNode;

impl PipelineNode for VerifyNode {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let policy = session
                .plan
                .as_ref()
                .map(|p| p.verification.clone())
                .unwrap_or_default();

            if !policy.enabled {
                return Ok(NodeOutcome::Advance);
            }

            // Top-confidence facts, ties broken by statement for determinism.
            let mut ranked: Vec<(usize, f64)> = session
                .facts
                .iter()
                .enumerate()
                .map(|(i, f)| (i, f.confidence))
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| session.facts[a.0].statement.cmp(&session.facts[b.0].statement))
            });
            let targets: Vec<usize> = ranked.into_iter().take(policy.top_n).map(|(i, _)| i).collect();

            let model = ctx
                .router
                .select(TaskComplexity::Low, session.privacy, false);
            let mut downgraded = 0usize;

            for index in targets {
                if ctx.is_cancelled() {
                    return Err(ResearchError::Cancelled);
                }

                let (statement, source) = {
                    let fact = &session.facts[index];
                    (fact.statement.clone(), fact.source.clone())
                };

                let supported = match ctx.fetcher.fetch(&source).await {
                    Ok(page) if !page.content.is_empty() => {
                        let window: String = page.content.chars().take(8_000).collect();
                        let messages = vec![
                            ChatMessage::system(VERIFY_SYSTEM_PROMPT),
                            ChatMessage::user(format!(
                                "Claim: {}\n\nSource text:\n{}",
                                statement, window
                            )),
                        ];
                        match ctx
                            .router
                            .complete(messages, model, session.privacy, Some(0.0), 8)
                            .await
                        {
                            Ok(completion) => {
                                session.llm_tokens_used += completion.usage.total();
                                completion.text.trim().to_lowercase().starts_with("yes")
                            }
                            Err(e @ LlmError::Policy(_)) => return Err(e.into()),
                            Err(e) => {
                                tracing::warn!(source = %source, error = %e, "Verification call failed, leaving fact as-is");
                                continue;
                            }
                        }
                    }
                    _ => {
                        // Source no longer reachable — treat as unverified.
                        false
                    }
                };

                if !supported {
                    let fact = &mut session.facts[index];
                    fact.confidence = (fact.confidence * DOWNGRADE_FACTOR).max(0.1);
                    downgraded += 1;
                    tracing::info!(
                        session_id = %session.id,
                        source = %source,
                        "Fact failed re-verification, downgraded"
                    );
                }
            }

            tracing::info!(
                session_id = %session.id,
                downgraded,
                "Verification pass complete"
            );

            Ok(NodeOutcome::Advance)
        })
    }
}
