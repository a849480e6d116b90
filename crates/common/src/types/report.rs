use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::types::SaturationMetrics;

/// A single finding in the final report, confidence-sorted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub statement: String,
    pub confidence: f64,
    pub source: String,
    #[serde(default)]
    pub supporting_sources: Vec<String>,
}

/// A source cited by the report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportSource {
    pub url: String,
    pub title: String,
    /// Provider variant that surfaced this source.
    #[serde(rename = "type")]
    pub kind: String,
}

/// How the research was conducted — queried providers, counts, stopping data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Methodology {
    pub sources_queried: Vec<String>,
    pub entities_found: usize,
    pub facts_extracted: usize,
    pub saturation_metrics: SaturationMetrics,
    pub stop_reason: String,
}

/// The structured research report with provenance. Field order is the wire
/// order; encode → decode → encode is byte-stable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub session_id: SessionId,
    pub query: String,
    pub domain: String,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub sources: Vec<ReportSource>,
    pub methodology: Methodology,
    pub limitations: Vec<String>,
    pub contradictions_found: usize,
    pub overall_confidence: f64,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Report {
        Report {
            session_id: SessionId::new(),
            query: "effects of climate change on wheat yields".into(),
            domain: "academic".into(),
            summary: "Summary.".into(),
            findings: vec![Finding {
                statement: "Yields decline ~6% per degree of warming".into(),
                confidence: 0.8,
                source: "https://example.org/paper".into(),
                supporting_sources: vec!["https://example.com/other".into()],
            }],
            sources: vec![ReportSource {
                url: "https://example.org/paper".into(),
                title: "Paper".into(),
                kind: "semantic_scholar".into(),
            }],
            methodology: Methodology {
                sources_queried: vec!["semantic_scholar".into(), "arxiv".into()],
                entities_found: 12,
                facts_extracted: 20,
                saturation_metrics: SaturationMetrics::default(),
                stop_reason: "saturation_reached".into(),
            },
            limitations: vec!["Limited preprint coverage".into()],
            contradictions_found: 0,
            overall_confidence: 0.72,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_json_roundtrip_is_byte_identical() {
        let report = sample_report();
        let first = serde_json::to_string(&report).unwrap();
        let decoded: Report = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&decoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_source_kind_serializes_as_type() {
        let json = serde_json::to_value(sample_report()).unwrap();
        assert_eq!(json["sources"][0]["type"], "semantic_scholar");
    }
}
