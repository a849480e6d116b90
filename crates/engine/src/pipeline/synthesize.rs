use std::future::Future;
use std::pin::Pin;

use chrono::Utc;

use deepresearch_common::api::ProgressEvent;
use deepresearch_common::types::{
    Finding, Methodology, Report, ReportSource, ResearchSession,
};
use deepresearch_common::{ResearchError, Result};

use super::{NodeContext, NodeOutcome, PipelineNode};
use crate::llm::{ChatMessage, LlmError, TaskComplexity};

/// Facts fed to the summary prompt.
const SUMMARY_FACT_COUNT: usize = 10;

const SUMMARY_SYSTEM_PROMPT: &str = "You write executive summaries of research findings. \
Write 2-3 tight paragraphs of plain prose. State what the evidence shows, note disagreement \
between sources where it exists, and do not invent facts beyond those given.";

/// Synthesize node: assemble the final report — LLM executive summary,
/// confidence-sorted findings, grouped sources, methodology, limitations.
/// Deterministic over the same session state apart from the timestamp.
pub struct SynthesizeNode;

impl PipelineNode for SynthesizeNode {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let stop_reason = session.stop_reason.ok_or_else(|| {
                ResearchError::Internal("synthesize reached without a stop reason".into())
            })?;

            // Findings: confidence-sorted, ties broken by statement so two
            // runs over the same state produce the same ordering.
            let mut findings: Vec<Finding> = session
                .facts
                .iter()
                .map(|f| Finding {
                    statement: f.statement.clone(),
                    confidence: f.confidence,
                    source: f.source.clone(),
                    supporting_sources: f.supporting_sources.clone(),
                })
                .collect();
            findings.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.statement.cmp(&b.statement))
            });

            let cited: std::collections::HashSet<&str> =
                session.facts.iter().map(|f| f.source.as_str()).collect();
            let mut sources: Vec<ReportSource> = session
                .entities
                .iter()
                .filter(|e| cited.contains(e.url.as_str()))
                .map(|e| ReportSource {
                    url: e.url.clone(),
                    title: e.title.clone(),
                    kind: e.provider.clone(),
                })
                .collect();
            sources.sort_by(|a, b| a.url.cmp(&b.url));

            let overall_confidence = if findings.is_empty() {
                0.0
            } else {
                findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64
            };

            let summary = self
                .write_summary(ctx, session, &findings, stop_reason.as_str())
                .await?;

            let limitations = build_limitations(session, stop_reason.as_str());

            session.report = Some(Report {
                session_id: session.id,
                query: session.query.clone(),
                domain: session.domain.as_str().to_string(),
                summary,
                findings,
                sources,
                methodology: Methodology {
                    sources_queried: session.providers_queried.clone(),
                    entities_found: session.entities.len(),
                    facts_extracted: session.facts.len(),
                    saturation_metrics: session.saturation,
                    stop_reason: stop_reason.as_str().to_string(),
                },
                limitations,
                contradictions_found: session.contradictions.len(),
                overall_confidence,
                generated_at: Utc::now(),
            });

            tracing::info!(
                session_id = %session.id,
                findings = session.report.as_ref().map(|r| r.findings.len()).unwrap_or(0),
                overall_confidence,
                "Report synthesized"
            );

            Ok(NodeOutcome::Advance)
        })
    }
}

impl SynthesizeNode {
    /// LLM executive summary, streamed so observers see tokens as they land.
    /// Falls back to a deterministic digest when no backend cooperates.
    async fn write_summary(
        &self,
        ctx: &NodeContext,
        session: &ResearchSession,
        findings: &[Finding],
        stop_reason: &str,
    ) -> Result<String> {
        if findings.is_empty() {
            return Ok(format!(
                "No verifiable facts were found for \"{}\". Research stopped: {}.",
                session.query, stop_reason
            ));
        }

        let fact_lines: String = findings
            .iter()
            .take(SUMMARY_FACT_COUNT)
            .map(|f| format!("- ({:.2}) {}\n", f.confidence, f.statement))
            .collect();

        let messages = vec![
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Research query: {}\n\nTop findings:\n{}\nContradictions detected: {}\n\
                 Write the executive summary.",
                session.query,
                fact_lines,
                session.contradictions.len()
            )),
        ];

        let model = ctx
            .router
            .select(TaskComplexity::High, session.privacy, false);

        match ctx
            .router
            .complete_stream(messages, model, session.privacy, Some(0.3), 1_024)
            .await
        {
            Ok(mut chunks) => {
                let mut summary = String::new();
                while let Some(chunk) = chunks.recv().await {
                    ctx.emit(ProgressEvent::Token {
                        text: chunk.clone(),
                    });
                    summary.push_str(&chunk);
                }
                if summary.trim().is_empty() {
                    tracing::warn!(session_id = %session.id, "Empty summary stream, using fallback");
                    Ok(fallback_summary(session, findings, stop_reason))
                } else {
                    Ok(summary.trim().to_string())
                }
            }
            Err(e @ LlmError::Policy(_)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Summary generation failed, using fallback");
                Ok(fallback_summary(session, findings, stop_reason))
            }
        }
    }
}

/// Deterministic summary used when the LLM path degrades.
fn fallback_summary(session: &ResearchSession, findings: &[Finding], stop_reason: &str) -> String {
    let top: Vec<String> = findings
        .iter()
        .take(3)
        .map(|f| f.statement.clone())
        .collect();
    format!(
        "Research on \"{}\" gathered {} sources and {} facts before stopping ({}). \
         Leading findings: {}",
        session.query,
        session.entities.len(),
        session.facts.len(),
        stop_reason,
        top.join("; ")
    )
}

/// Limitations block: coverage gaps, contradictions, degradations, and an
/// explicit statement of what was not found and why the run stopped.
fn build_limitations(session: &ResearchSession, stop_reason: &str) -> Vec<String> {
    let mut limitations = Vec::new();

    let thin_groups = session
        .fact_groups
        .iter()
        .filter(|g| g.sources.len() < 2)
        .count();
    if thin_groups > 0 {
        limitations.push(format!(
            "{} finding group(s) rest on a single source and lack independent corroboration.",
            thin_groups
        ));
    }

    if !session.contradictions.is_empty() {
        limitations.push(format!(
            "{} contradiction(s) between sources remain unresolved.",
            session.contradictions.len()
        ));
    }

    if session.providers_skipped > 0 {
        limitations.push(format!(
            "{} provider quer(ies) were skipped due to open circuits or rate limits.",
            session.providers_skipped
        ));
    }

    if session.fetch_failures > 0 {
        limitations.push(format!(
            "{} source page(s) could not be fetched; their snippets were used instead.",
            session.fetch_failures
        ));
    }

    if !session.gap_terms.is_empty() {
        limitations.push(format!(
            "Not found despite targeted search: additional coverage of {}.",
            session.gap_terms.join(", ")
        ));
    }

    limitations.push(format!("Research stopped because: {}.", stop_reason));

    limitations
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepresearch_common::types::{Fact, PrivacyMode, StopReason};

    #[test]
    fn test_fallback_summary_mentions_stop_reason() {
        let mut session = ResearchSession::new("wheat yields", PrivacyMode::CloudAllowed);
        session.add_fact(Fact::new("yields fell 6%", "https://a.com", 0.8, "llm"));
        let findings = vec![Finding {
            statement: "yields fell 6%".into(),
            confidence: 0.8,
            source: "https://a.com".into(),
            supporting_sources: vec![],
        }];
        let summary = fallback_summary(&session, &findings, "saturation_reached");
        assert!(summary.contains("saturation_reached"));
        assert!(summary.contains("yields fell 6%"));
    }

    #[test]
    fn test_limitations_state_why_stopped() {
        let mut session = ResearchSession::new("q", PrivacyMode::CloudAllowed);
        session.stop_reason = Some(StopReason::MaxCycles);
        session.gap_terms = vec!["drought".into()];
        session.fetch_failures = 2;

        let limitations = build_limitations(&session, "max_cycles");
        assert!(limitations.iter().any(|l| l.contains("max_cycles")));
        assert!(limitations.iter().any(|l| l.contains("drought")));
        assert!(limitations.iter().any(|l| l.contains("2 source page")));
    }
}
