use serde::{Deserialize, Serialize};

use crate::ids::FactId;

/// An atomic factual claim extracted from an Entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub statement: String,
    /// Normalized URL of the entity this was extracted from. Always a member
    /// of the session's entity set.
    pub source: String,
    /// Current confidence in [0, 1]; starts at the extraction confidence and
    /// is recomputed by Analyze from the immutable base below.
    pub confidence: f64,
    /// Confidence reported by the extractor, never mutated afterwards.
    pub extraction_confidence: f64,
    /// Tag of the extractor that produced this fact (e.g. "llm").
    pub extracted_by: String,
    /// Other sources whose facts landed in the same cross-reference group.
    #[serde(default)]
    pub supporting_sources: Vec<String>,
    /// Agreement score of this fact's group, filled during Analyze.
    #[serde(default)]
    pub agreement: f64,
    /// Whether this fact participates in a detected contradiction.
    #[serde(default)]
    pub contradicted: bool,
}

impl Fact {
    pub fn new(statement: &str, source: &str, confidence: f64, extracted_by: &str) -> Self {
        Self {
            id: FactId::new(),
            statement: statement.trim().to_string(),
            source: source.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            extraction_confidence: confidence.clamp(0.0, 1.0),
            extracted_by: extracted_by.to_string(),
            supporting_sources: Vec::new(),
            agreement: 0.0,
            contradicted: false,
        }
    }

    /// Session-wide dedup key: the lowercased, trimmed statement. Two facts
    /// with equal keys are the same fact regardless of source.
    pub fn dedup_key(&self) -> String {
        statement_key(&self.statement)
    }
}

/// Normalized form a statement is hashed under for dedup.
pub(crate) fn statement_key(statement: &str) -> String {
    statement.trim().to_lowercase()
}

/// A set of Jaccard-similar facts with the sources backing them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactGroup {
    pub fact_ids: Vec<FactId>,
    /// Unique source URLs across the group, sorted.
    pub sources: Vec<String>,
    /// min(1, |unique sources| / 3).
    pub agreement: f64,
}

/// The kind of conflict detected between two facts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionKind {
    Year,
    Numeric,
    Boolean,
}

/// A detected conflict between two facts from distinct sources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contradiction {
    pub fact_a: FactId,
    pub fact_b: FactId,
    pub kind: ContradictionKind,
    pub value_a: String,
    pub value_b: String,
}
