use serde::{Deserialize, Serialize};

/// Detected research domain. Drives provider priority, saturation thresholds
/// and verification policy via `DomainConfiguration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDomain {
    Medical,
    Regulatory,
    Academic,
    CompetitiveIntelligence,
    General,
}

impl ResearchDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::Regulatory => "regulatory",
            Self::Academic => "academic",
            Self::CompetitiveIntelligence => "competitive_intelligence",
            Self::General => "general",
        }
    }

    pub fn all() -> [ResearchDomain; 5] {
        [
            Self::Medical,
            Self::Regulatory,
            Self::Academic,
            Self::CompetitiveIntelligence,
            Self::General,
        ]
    }
}

impl std::str::FromStr for ResearchDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medical" => Ok(Self::Medical),
            "regulatory" => Ok(Self::Regulatory),
            "academic" => Ok(Self::Academic),
            "competitive_intelligence" | "competitive" => Ok(Self::CompetitiveIntelligence),
            "general" => Ok(Self::General),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// Coefficients of the saturation formula. Exposed per domain so playbooks
/// can tune how aggressively a domain keeps digging.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SaturationWeights {
    pub new_entity: f64,
    pub new_fact: f64,
    pub agreement: f64,
}

impl Default for SaturationWeights {
    fn default() -> Self {
        Self {
            new_entity: 0.5,
            new_fact: 0.3,
            agreement: 0.2,
        }
    }
}

/// Whether and how deeply facts are re-verified against primary sources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationPolicy {
    pub enabled: bool,
    /// Number of top-confidence facts to re-verify.
    pub top_n: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            top_n: 5,
        }
    }
}

/// A domain playbook: provider priorities, stopping thresholds, verification
/// rules, mandatory inclusions. Loaded from `domain_configs/<domain>.json`
/// and overlaid with persisted overrides, shallow merge, last write wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainConfiguration {
    pub domain: ResearchDomain,
    /// Providers in priority order. Unknown names are skipped at plan time.
    pub preferred_providers: Vec<String>,
    pub min_cycles: u32,
    pub saturation_threshold: f64,
    #[serde(default)]
    pub verification: VerificationPolicy,
    /// Sources that must be attempted when present (e.g. regulatory bodies).
    #[serde(default)]
    pub mandatory_sources: Vec<String>,
    #[serde(default)]
    pub saturation_weights: SaturationWeights,
}

impl DomainConfiguration {
    /// Built-in playbook defaults, used when no JSON playbook exists yet.
    pub fn default_for(domain: ResearchDomain) -> Self {
        match domain {
            ResearchDomain::Medical => Self {
                domain,
                preferred_providers: vec![
                    "pubmed".into(),
                    "semantic_scholar".into(),
                    "unpaywall".into(),
                    "tavily".into(),
                    "brave".into(),
                ],
                min_cycles: 2,
                saturation_threshold: 0.9,
                verification: VerificationPolicy {
                    enabled: true,
                    top_n: 5,
                },
                mandatory_sources: vec!["nih.gov".into(), "who.int".into()],
                saturation_weights: SaturationWeights::default(),
            },
            ResearchDomain::Regulatory => Self {
                domain,
                preferred_providers: vec![
                    "tavily".into(),
                    "brave".into(),
                    "exa".into(),
                    "crawler".into(),
                ],
                min_cycles: 2,
                saturation_threshold: 0.9,
                verification: VerificationPolicy {
                    enabled: true,
                    top_n: 5,
                },
                mandatory_sources: vec!["easa.europa.eu".into(), "faa.gov".into()],
                saturation_weights: SaturationWeights::default(),
            },
            ResearchDomain::Academic => Self {
                domain,
                preferred_providers: vec![
                    "semantic_scholar".into(),
                    "arxiv".into(),
                    "unpaywall".into(),
                    "exa".into(),
                    "tavily".into(),
                ],
                min_cycles: 2,
                saturation_threshold: 0.85,
                verification: VerificationPolicy::default(),
                mandatory_sources: Vec::new(),
                saturation_weights: SaturationWeights::default(),
            },
            ResearchDomain::CompetitiveIntelligence => Self {
                domain,
                preferred_providers: vec![
                    "exa".into(),
                    "tavily".into(),
                    "brave".into(),
                    "crawler".into(),
                ],
                min_cycles: 1,
                saturation_threshold: 0.8,
                verification: VerificationPolicy::default(),
                mandatory_sources: Vec::new(),
                saturation_weights: SaturationWeights::default(),
            },
            ResearchDomain::General => Self {
                domain,
                preferred_providers: vec![
                    "tavily".into(),
                    "brave".into(),
                    "exa".into(),
                    "semantic_scholar".into(),
                ],
                min_cycles: 1,
                saturation_threshold: 0.85,
                verification: VerificationPolicy::default(),
                mandatory_sources: Vec::new(),
                saturation_weights: SaturationWeights::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_round_trips_through_str() {
        for domain in ResearchDomain::all() {
            assert_eq!(domain.as_str().parse::<ResearchDomain>().unwrap(), domain);
        }
    }

    #[test]
    fn test_verification_gated_by_domain() {
        assert!(DomainConfiguration::default_for(ResearchDomain::Medical).verification.enabled);
        assert!(DomainConfiguration::default_for(ResearchDomain::Regulatory).verification.enabled);
        assert!(!DomainConfiguration::default_for(ResearchDomain::General).verification.enabled);
    }
}
