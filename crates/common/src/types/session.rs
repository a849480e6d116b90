use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::types::{
    normalize_url, Contradiction, Entity, Fact, FactGroup, Report, ResearchDomain,
    SaturationMetrics, SaturationWeights, VerificationPolicy,
};

/// Pipeline phases. Transitions are owned exclusively by the orchestrator;
/// nodes report an outcome, they never self-transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Starting,
    Clarify,
    AwaitingApproval,
    Plan,
    Collect,
    Process,
    Analyze,
    Verify,
    Evaluate,
    Synthesize,
    Export,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Clarify => "clarify",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Plan => "plan",
            Self::Collect => "collect",
            Self::Process => "process",
            Self::Analyze => "analyze",
            Self::Verify => "verify",
            Self::Evaluate => "evaluate",
            Self::Synthesize => "synthesize",
            Self::Export => "export",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Why a session stopped. Every completed session records exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    SaturationReached,
    MaxCycles,
    Cancelled,
    NoProgress,
    FatalError,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SaturationReached => "saturation_reached",
            Self::MaxCycles => "max_cycles",
            Self::Cancelled => "cancelled",
            Self::NoProgress => "no_progress",
            Self::FatalError => "fatal_error",
        }
    }
}

/// Session-level privacy policy for LLM routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivacyMode {
    /// Remote completion backends are forbidden; selecting one is a policy
    /// violation that fails the session before any call is made.
    LocalOnly,
    CloudAllowed,
}

impl Default for PrivacyMode {
    fn default() -> Self {
        Self::CloudAllowed
    }
}

/// Output of the Plan node: which providers to query and when to stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchPlan {
    /// Providers in query order.
    pub providers: Vec<String>,
    pub sources_per_provider: usize,
    pub saturation_threshold: f64,
    pub min_cycles: u32,
    pub max_cycles: u32,
    /// Entities enriched with full content each cycle.
    pub enrich_top_k: usize,
    pub verification: VerificationPolicy,
    pub weights: SaturationWeights,
}

/// All mutable state of one research run. Created by the orchestrator,
/// mutated only by the active pipeline node, archived on terminal phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchSession {
    pub id: SessionId,
    pub query: String,
    pub refined_query: String,
    pub domain: ResearchDomain,
    pub privacy: PrivacyMode,
    pub phase: Phase,
    pub cycle: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ResearchPlan>,
    /// Clarification question, when the Clarify node parks the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,

    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub fact_groups: Vec<FactGroup>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub saturation: SaturationMetrics,
    /// Gap terms fed back into the next Collect cycle.
    #[serde(default)]
    pub gap_terms: Vec<String>,
    /// URLs already run through fact extraction, to keep Process incremental
    /// across cycles.
    #[serde(default)]
    pub processed_urls: Vec<String>,

    /// Providers that contributed results, cumulative, insertion-ordered.
    #[serde(default)]
    pub providers_queried: Vec<String>,
    #[serde(default)]
    pub providers_skipped: u32,
    #[serde(default)]
    pub fetch_failures: u32,
    #[serde(default)]
    pub new_entities_this_cycle: usize,
    #[serde(default)]
    pub new_facts_this_cycle: usize,
    #[serde(default)]
    pub fetch_seconds_used: u64,
    #[serde(default)]
    pub llm_tokens_used: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchSession {
    pub fn new(query: &str, privacy: PrivacyMode) -> Self {
        Self {
            id: SessionId::new(),
            query: query.to_string(),
            refined_query: query.to_string(),
            domain: ResearchDomain::General,
            privacy,
            phase: Phase::Starting,
            cycle: 0,
            stop_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            plan: None,
            clarification: None,
            entities: Vec::new(),
            facts: Vec::new(),
            fact_groups: Vec::new(),
            contradictions: Vec::new(),
            saturation: SaturationMetrics::default(),
            gap_terms: Vec::new(),
            processed_urls: Vec::new(),
            providers_queried: Vec::new(),
            providers_skipped: 0,
            fetch_failures: 0,
            new_entities_this_cycle: 0,
            new_facts_this_cycle: 0,
            fetch_seconds_used: 0,
            llm_tokens_used: 0,
            report: None,
            error: None,
        }
    }

    /// Append an entity, deduplicating by normalized URL. Returns true when
    /// the entity was new.
    pub fn add_entity(&mut self, mut entity: Entity) -> bool {
        entity.url = normalize_url(&entity.url);
        if self.entities.iter().any(|e| e.url == entity.url) {
            return false;
        }
        self.entities.push(entity);
        true
    }

    /// Append a fact, deduplicating by the lowercase-trimmed statement key.
    /// Returns true when the fact was new.
    pub fn add_fact(&mut self, fact: Fact) -> bool {
        let key = fact.dedup_key();
        if self.facts.iter().any(|f| f.dedup_key() == key) {
            return false;
        }
        self.facts.push(fact);
        true
    }

    pub fn entity_urls(&self) -> HashSet<&str> {
        self.entities.iter().map(|e| e.url.as_str()).collect()
    }

    pub fn record_provider_queried(&mut self, provider: &str) {
        if !self.providers_queried.iter().any(|p| p == provider) {
            self.providers_queried.push(provider.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_entity_dedups_by_normalized_url() {
        let mut session = ResearchSession::new("q", PrivacyMode::CloudAllowed);
        assert!(session.add_entity(Entity::new("https://a.com/x", "t", "s", "tavily")));
        assert!(!session.add_entity(Entity::new("HTTPS://A.COM/x#frag", "t2", "s2", "brave")));
        assert_eq!(session.entities.len(), 1);
    }

    #[test]
    fn test_add_fact_dedups_by_statement() {
        let mut session = ResearchSession::new("q", PrivacyMode::CloudAllowed);
        assert!(session.add_fact(Fact::new("Founded in 2010", "https://a.com/x", 0.8, "llm")));
        assert!(!session.add_fact(Fact::new("  founded in 2010  ", "https://b.com/y", 0.5, "llm")));
        assert_eq!(session.facts.len(), 1);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Complete.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Evaluate.is_terminal());
    }
}
