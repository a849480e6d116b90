use std::path::Path;

use deepresearch_common::api::ExportFormat;
use deepresearch_common::types::Report;
use deepresearch_common::{ResearchError, Result};

/// Rendering capability for one export format. Markdown and JSON render
/// in-process; the document formats (pdf, docx, pptx, xlsx) are external
/// collaborators and surface as unavailable registry slots.
pub trait ReportRenderer: Send + Sync {
    fn format(&self) -> ExportFormat;
    fn content_type(&self) -> &'static str;
    fn render(&self, report: &Report) -> Result<Vec<u8>>;
}

pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(report)?)
    }
}

pub struct MarkdownRenderer;

impl ReportRenderer for MarkdownRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Markdown
    }

    fn content_type(&self) -> &'static str {
        "text/markdown"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>> {
        let mut out = String::new();

        out.push_str(&format!("# Research Report: {}\n\n", report.query));
        out.push_str(&format!(
            "- Domain: {}\n- Overall confidence: {:.2}\n- Generated: {}\n\n",
            report.domain,
            report.overall_confidence,
            report.generated_at.to_rfc3339()
        ));

        out.push_str("## Summary\n\n");
        out.push_str(&report.summary);
        out.push_str("\n\n## Findings\n\n");

        for finding in &report.findings {
            out.push_str(&format!(
                "- **{:.2}** {} — [{}]({})\n",
                finding.confidence, finding.statement, finding.source, finding.source
            ));
        }

        out.push_str("\n## Sources\n\n");
        for source in &report.sources {
            out.push_str(&format!(
                "- [{}]({}) ({})\n",
                source.title, source.url, source.kind
            ));
        }

        out.push_str("\n## Methodology\n\n");
        let m = &report.methodology;
        out.push_str(&format!(
            "Providers queried: {}. Entities found: {}. Facts extracted: {}. \
             Saturation: {:.2}. Stop reason: {}.\n",
            m.sources_queried.join(", "),
            m.entities_found,
            m.facts_extracted,
            m.saturation_metrics.overall,
            m.stop_reason
        ));

        out.push_str("\n## Limitations\n\n");
        for limitation in &report.limitations {
            out.push_str(&format!("- {}\n", limitation));
        }

        out.push_str(&format!(
            "\nContradictions found: {}\n",
            report.contradictions_found
        ));

        Ok(out.into_bytes())
    }
}

/// Registry of installed renderers.
pub struct ExportRegistry {
    renderers: Vec<Box<dyn ReportRenderer>>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self {
            renderers: vec![Box::new(MarkdownRenderer), Box::new(JsonRenderer)],
        }
    }

    pub fn available_formats(&self) -> Vec<ExportFormat> {
        self.renderers.iter().map(|r| r.format()).collect()
    }

    /// Render a report, or fail with `renderer_unavailable` for formats whose
    /// renderer is an external collaborator not installed in-process.
    pub fn render(&self, format: ExportFormat, report: &Report) -> Result<(Vec<u8>, &'static str)> {
        match self.renderers.iter().find(|r| r.format() == format) {
            Some(renderer) => Ok((renderer.render(report)?, renderer.content_type())),
            None => Err(ResearchError::Validation(format!(
                "renderer_unavailable: no renderer installed for {}",
                format.as_str()
            ))),
        }
    }
}

impl Default for ExportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the report to the data directory as both JSON and Markdown.
pub fn write_report_files(data_dir: &Path, report: &Report) -> Result<()> {
    let dir = data_dir.join("reports");
    std::fs::create_dir_all(&dir)
        .map_err(|e| ResearchError::Store(format!("cannot create {}: {}", dir.display(), e)))?;

    let registry = ExportRegistry::new();
    for format in [ExportFormat::Json, ExportFormat::Markdown] {
        let (bytes, _) = registry.render(format, report)?;
        let extension = match format {
            ExportFormat::Json => "json",
            _ => "md",
        };
        let path = dir.join(format!("{}.{}", report.session_id, extension));
        std::fs::write(&path, bytes)
            .map_err(|e| ResearchError::Store(format!("cannot write {}: {}", path.display(), e)))?;
    }

    tracing::info!(session_id = %report.session_id, "Report files written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deepresearch_common::types::{Finding, Methodology, ReportSource, SaturationMetrics};
    use deepresearch_common::SessionId;

    fn sample_report() -> Report {
        Report {
            session_id: SessionId::new(),
            query: "wheat yields".into(),
            domain: "academic".into(),
            summary: "Yields decline.".into(),
            findings: vec![Finding {
                statement: "Yields fell 6% per degree".into(),
                confidence: 0.82,
                source: "https://example.org/p".into(),
                supporting_sources: vec![],
            }],
            sources: vec![ReportSource {
                url: "https://example.org/p".into(),
                title: "Paper".into(),
                kind: "arxiv".into(),
            }],
            methodology: Methodology {
                sources_queried: vec!["arxiv".into()],
                entities_found: 1,
                facts_extracted: 1,
                saturation_metrics: SaturationMetrics::default(),
                stop_reason: "saturation_reached".into(),
            },
            limitations: vec!["Single source.".into()],
            contradictions_found: 0,
            overall_confidence: 0.82,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_markdown_renderer_includes_sections() {
        let (bytes, content_type) = ExportRegistry::new()
            .render(ExportFormat::Markdown, &sample_report())
            .unwrap();
        let markdown = String::from_utf8(bytes).unwrap();
        assert_eq!(content_type, "text/markdown");
        assert!(markdown.contains("## Findings"));
        assert!(markdown.contains("saturation_reached"));
        assert!(markdown.contains("Yields fell 6%"));
    }

    #[test]
    fn test_json_renderer_roundtrips() {
        let (bytes, _) = ExportRegistry::new()
            .render(ExportFormat::Json, &sample_report())
            .unwrap();
        let decoded: Report = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.query, "wheat yields");
    }

    #[test]
    fn test_document_formats_are_unavailable() {
        let err = ExportRegistry::new()
            .render(ExportFormat::Pdf, &sample_report())
            .unwrap_err();
        assert!(err.to_string().contains("renderer_unavailable"));
    }
}
