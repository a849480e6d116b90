use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use deepresearch_common::types::{Fact, ResearchSession};
use deepresearch_common::{ResearchError, Result};

use super::text::strip_code_fences;
use super::{NodeContext, NodeOutcome, PipelineNode};
use crate::llm::{ChatMessage, LlmError, TaskComplexity};

/// Per-entity content window handed to the extractor.
const CONTENT_WINDOW_CHARS: usize = 8_000;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract atomic factual claims from source text. \
Respond with ONLY a JSON array of objects of the form \
{\"statement\": string, \"confidence\": number between 0 and 1}. \
Include only claims relevant to the research query. No prose, no markdown.";

#[derive(Deserialize)]
struct ExtractedFact {
    statement: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Tolerant parse of the extractor output: strip code fences, then fall back
/// to the outermost bracketed slice if the whole text is not valid JSON.
fn parse_extraction(raw: &str) -> Option<Vec<ExtractedFact>> {
    let stripped = strip_code_fences(raw);

    if let Ok(facts) = serde_json::from_str::<Vec<ExtractedFact>>(stripped) {
        return Some(facts);
    }

    let start = stripped.find('[')?;
    let end = stripped.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

/// Process node: run fact extraction over every enriched entity not yet
/// processed, deduplicating statements session-wide.
pub struct ProcessNode;

impl PipelineNode for ProcessNode {
    fn name(&self) -> &'static str {
        "process"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            session.new_facts_this_cycle = 0;

            let pending: Vec<(String, String)> = session
                .entities
                .iter()
                .filter(|e| e.content.is_some() && !session.processed_urls.contains(&e.url))
                .map(|e| (e.url.clone(), e.content.clone().unwrap_or_default()))
                .collect();

            let model = ctx
                .router
                .select(TaskComplexity::Low, session.privacy, false);

            for (url, content) in pending {
                if ctx.is_cancelled() {
                    return Err(ResearchError::Cancelled);
                }

                session.processed_urls.push(url.clone());

                let window: String = content.chars().take(CONTENT_WINDOW_CHARS).collect();
                let messages = vec![
                    ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
                    ChatMessage::user(format!(
                        "Research query: {}\n\nSource text:\n{}",
                        session.refined_query, window
                    )),
                ];

                let completion = match ctx
                    .router
                    .complete(messages, model, session.privacy, Some(0.0), 1_024)
                    .await
                {
                    Ok(completion) => completion,
                    Err(e @ LlmError::Policy(_)) => return Err(e.into()),
                    Err(e) => {
                        // Degradable: this document contributes nothing.
                        tracing::warn!(url = %url, error = %e, "Extraction call failed, dropping document");
                        continue;
                    }
                };

                session.llm_tokens_used += completion.usage.total();

                let Some(extracted) = parse_extraction(&completion.text) else {
                    tracing::warn!(url = %url, "Unparseable extraction output, dropping document");
                    metrics::counter!("process.parse_errors").increment(1);
                    continue;
                };

                let mut added = 0usize;
                for fact in extracted {
                    if fact.statement.trim().is_empty() {
                        continue;
                    }
                    if session.add_fact(Fact::new(&fact.statement, &url, fact.confidence, "llm")) {
                        added += 1;
                    }
                }
                session.new_facts_this_cycle += added;

                tracing::debug!(url = %url, facts = added, "Document processed");
            }

            tracing::info!(
                session_id = %session.id,
                cycle = session.cycle,
                new_facts = session.new_facts_this_cycle,
                total_facts = session.facts.len(),
                "Fact extraction complete"
            );

            Ok(NodeOutcome::Advance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_array() {
        let facts =
            parse_extraction(r#"[{"statement": "Founded in 2010", "confidence": 0.9}]"#).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].confidence, 0.9);
    }

    #[test]
    fn test_parse_fenced_output() {
        let raw = "```json\n[{\"statement\": \"X\", \"confidence\": 0.4}]\n```";
        assert_eq!(parse_extraction(raw).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let raw = "Here are the facts:\n[{\"statement\": \"Y\"}]\nDone.";
        let facts = parse_extraction(raw).unwrap();
        assert_eq!(facts[0].confidence, 0.5); // default fills in
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_extraction("no json here").is_none());
        assert!(parse_extraction("]broken[").is_none());
    }
}
