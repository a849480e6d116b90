use deepresearch_common::types::{PrivacyMode, ResearchDomain};

use crate::llm::{ChatMessage, LlmRouter, LogicalModel};

/// Keyword dictionary per domain. The fast path is deterministic: the domain
/// with the most keyword hits wins outright.
const MEDICAL_KEYWORDS: &[&str] = &[
    "medical", "symptom", "symptoms", "disease", "diagnosis", "treatment", "drug", "clinical",
    "patient", "therapy", "cancer", "vaccine", "dosage", "syndrome", "prognosis",
];

const REGULATORY_KEYWORDS: &[&str] = &[
    "regulation", "regulatory", "compliance", "directive", "certification", "legislation",
    "statute", "easa", "faa", "fda", "gdpr", "sora", "permit", "licensing", "waiver",
];

const ACADEMIC_KEYWORDS: &[&str] = &[
    "research", "study", "studies", "paper", "literature", "meta-analysis", "peer-reviewed",
    "journal", "hypothesis", "experiment", "citation", "preprint", "effects", "yields",
];

const COMPETITIVE_KEYWORDS: &[&str] = &[
    "competitor", "competitors", "market", "pricing", "startup", "funding", "acquisition",
    "revenue", "strategy", "landscape", "vendor", "product launch",
];

fn keyword_score(query: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| query.contains(*k)).count()
}

/// Deterministic keyword pass. Returns None when the query is ambiguous
/// (no hits, or a tie between the top domains).
pub fn classify_by_keywords(query: &str) -> Option<ResearchDomain> {
    let query = query.to_lowercase();

    let mut scores = [
        (ResearchDomain::Medical, keyword_score(&query, MEDICAL_KEYWORDS)),
        (
            ResearchDomain::Regulatory,
            keyword_score(&query, REGULATORY_KEYWORDS),
        ),
        (
            ResearchDomain::Academic,
            keyword_score(&query, ACADEMIC_KEYWORDS),
        ),
        (
            ResearchDomain::CompetitiveIntelligence,
            keyword_score(&query, COMPETITIVE_KEYWORDS),
        ),
    ];
    scores.sort_by(|a, b| b.1.cmp(&a.1));

    let (best_domain, best) = scores[0];
    let (_, second) = scores[1];

    if best == 0 {
        return None;
    }
    if best == second {
        // Tie — too ambiguous for the fast path.
        return None;
    }
    Some(best_domain)
}

/// Classify a query: keyword dictionary first, LLM fallback when ambiguous.
/// Falls back to General when the LLM is unavailable or answers nonsense.
pub async fn classify(query: &str, router: &LlmRouter, privacy: PrivacyMode) -> ResearchDomain {
    if let Some(domain) = classify_by_keywords(query) {
        tracing::debug!(domain = domain.as_str(), "Domain classified by keywords");
        return domain;
    }

    let messages = vec![
        ChatMessage::system(
            "Classify the research query into exactly one domain. Respond with a single word \
             from: medical, regulatory, academic, competitive_intelligence, general.",
        ),
        ChatMessage::user(query.to_string()),
    ];

    match router
        .complete(messages, LogicalModel::LocalFast, privacy, Some(0.0), 8)
        .await
    {
        Ok(completion) => {
            let answer = completion
                .text
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
            match answer.parse::<ResearchDomain>() {
                Ok(domain) => {
                    tracing::debug!(domain = domain.as_str(), "Domain classified by LLM");
                    domain
                }
                Err(_) => {
                    tracing::warn!(answer = %completion.text, "Unparseable domain answer");
                    ResearchDomain::General
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM domain classification failed");
            ResearchDomain::General
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medical_query() {
        assert_eq!(
            classify_by_keywords("treatment options and symptoms for type 2 diabetes patients"),
            Some(ResearchDomain::Medical)
        );
    }

    #[test]
    fn test_academic_query() {
        assert_eq!(
            classify_by_keywords("effects of climate change on wheat yields"),
            Some(ResearchDomain::Academic)
        );
    }

    #[test]
    fn test_regulatory_query() {
        assert_eq!(
            classify_by_keywords("easa sora certification requirements for drone operations"),
            Some(ResearchDomain::Regulatory)
        );
    }

    #[test]
    fn test_ambiguous_query_defers() {
        assert_eq!(classify_by_keywords("best pizza in town"), None);
    }

    #[test]
    fn test_tie_defers() {
        // One medical hit, one regulatory hit.
        assert_eq!(classify_by_keywords("fda drug approval"), None);
    }
}
