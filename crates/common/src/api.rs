use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::types::{Phase, PrivacyMode, Report, SaturationMetrics};

/// POST /research/start request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartResearchRequest {
    pub query: String,
    #[serde(default)]
    pub privacy_mode: PrivacyMode,
}

/// POST /research/start response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartResearchResponse {
    pub session_id: SessionId,
    pub status: String,
}

/// GET /research/{id}/status response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: SessionId,
    pub current_phase: Phase,
    pub status: String,
    pub cycle: u32,
    pub entities_found: usize,
    pub facts_extracted: usize,
    pub sources_queried: Vec<String>,
    pub saturation_metrics: SaturationMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

/// POST /crawl/batch request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlBatchRequest {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Accepted for interface compatibility; the distributed variant is an
    /// external collaborator and this flag is ignored in-process.
    #[serde(default)]
    pub distributed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<CrawlOptions>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// One fetched page in a crawl batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlStats {
    pub requested: usize,
    pub fetched: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// POST /crawl/batch response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlBatchResponse {
    pub results: Vec<CrawlResult>,
    pub stats: CrawlStats,
}

/// Export formats accepted by POST /export. Markdown and JSON render
/// in-process; the document formats are registry slots for external
/// renderers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Xlsx => "xlsx",
        }
    }
}

/// POST /export request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub report: Report,
}

/// One event on a session's progress stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Phase {
        phase: Phase,
    },
    Stats {
        cycle: u32,
        entities_found: usize,
        facts_extracted: usize,
        saturation: f64,
    },
    /// Incremental chunk of streamed LLM output.
    Token {
        text: String,
    },
    Done {
        stop_reason: String,
    },
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_mode_wire_format() {
        let req: StartResearchRequest =
            serde_json::from_str(r#"{"query":"q","privacy_mode":"local-only"}"#).unwrap();
        assert_eq!(req.privacy_mode, PrivacyMode::LocalOnly);

        let req: StartResearchRequest = serde_json::from_str(r#"{"query":"q"}"#).unwrap();
        assert_eq!(req.privacy_mode, PrivacyMode::CloudAllowed);
    }

    #[test]
    fn test_progress_event_tagging() {
        let event = ProgressEvent::Phase {
            phase: Phase::Collect,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "phase");
        assert_eq!(json["phase"], "collect");
    }

    #[test]
    fn test_export_format_lowercase() {
        let fmt: ExportFormat = serde_json::from_str(r#""pdf""#).unwrap();
        assert_eq!(fmt, ExportFormat::Pdf);
    }
}
