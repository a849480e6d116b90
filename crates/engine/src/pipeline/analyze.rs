use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::{
    Contradiction, ContradictionKind, Fact, FactGroup, ResearchSession,
};
use deepresearch_common::Result;

use super::text::{content_tokens, extract_numbers, extract_years, jaccard, tokens};
use super::{NodeContext, NodeOutcome, PipelineNode};

/// Statements whose word-set Jaccard reaches this are the same claim.
const GROUP_SIMILARITY: f64 = 0.4;

/// Jaro-Winkler floor for catching rewordings that token overlap misses
/// (short statements, singular/plural drift).
const NEAR_DUPLICATE_SIMILARITY: f64 = 0.92;

/// Statements must be at least this topically related before a value
/// mismatch counts as a contradiction.
const RELATED_TOPIC_SIMILARITY: f64 = 0.3;

/// Relative difference beyond which two numbers conflict.
const NUMERIC_CONFLICT_RATIO: f64 = 0.2;

const NEGATION_MARKERS: &[&str] = &["not", "no", "never", "cannot", "without"];

/// Analyze node: cross-reference facts into agreement groups, detect
/// contradictions, and recompute per-fact confidence from the immutable
/// extraction base.
pub struct AnalyzeNode;

impl PipelineNode for AnalyzeNode {
    fn name(&self) -> &'static str {
        "analyze"
    }

    fn run<'a>(
        &'a self,
        _ctx: &'a NodeContext,
        session: &'a mut ResearchSession,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let groups = cross_reference(&mut session.facts);
            let contradictions = detect_contradictions(&mut session.facts);

            for fact in &mut session.facts {
                let supporting = fact.supporting_sources.len().min(3) as f64;
                let penalty = if fact.contradicted { 0.3 } else { 0.0 };
                fact.confidence =
                    (fact.extraction_confidence + 0.1 * supporting - penalty).clamp(0.1, 1.0);
            }

            tracing::info!(
                session_id = %session.id,
                groups = groups.len(),
                contradictions = contradictions.len(),
                "Analysis complete"
            );

            session.fact_groups = groups;
            session.contradictions = contradictions;
            Ok(NodeOutcome::Advance)
        })
    }
}

/// Group facts by Jaccard word-set similarity and annotate each with its
/// group's supporting sources. Agreement = min(1, |unique sources| / 3).
pub fn cross_reference(facts: &mut [Fact]) -> Vec<FactGroup> {
    let token_sets: Vec<HashSet<String>> = facts.iter().map(|f| tokens(&f.statement)).collect();
    let normalized: Vec<String> = facts
        .iter()
        .map(|f| f.statement.trim().to_lowercase())
        .collect();

    // Union-find over pairwise similarity.
    let mut parent: Vec<usize> = (0..facts.len()).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..facts.len() {
        for j in (i + 1)..facts.len() {
            if jaccard(&token_sets[i], &token_sets[j]) >= GROUP_SIMILARITY
                || strsim::jaro_winkler(&normalized[i], &normalized[j])
                    >= NEAR_DUPLICATE_SIMILARITY
            {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut members: std::collections::BTreeMap<usize, Vec<usize>> =
        std::collections::BTreeMap::new();
    for i in 0..facts.len() {
        let root = find(&mut parent, i);
        members.entry(root).or_default().push(i);
    }

    let mut groups = Vec::with_capacity(members.len());
    for indices in members.into_values() {
        let mut sources: Vec<String> = indices
            .iter()
            .map(|&i| facts[i].source.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sources.sort();

        let agreement = (sources.len() as f64 / 3.0).min(1.0);

        for &i in &indices {
            let own = facts[i].source.clone();
            facts[i].supporting_sources =
                sources.iter().filter(|s| **s != own).cloned().collect();
            facts[i].agreement = agreement;
        }

        groups.push(FactGroup {
            fact_ids: indices.iter().map(|&i| facts[i].id).collect(),
            sources,
            agreement,
        });
    }

    groups
}

/// Pairwise contradiction detection over facts from distinct sources.
/// Unrelated statements are suppressed by the non-stop-word Jaccard gate;
/// numerals are excluded from the relatedness measure, since the conflicting
/// values are exactly what differs between two statements about one topic.
pub fn detect_contradictions(facts: &mut [Fact]) -> Vec<Contradiction> {
    let content_sets: Vec<HashSet<String>> = facts
        .iter()
        .map(|f| {
            content_tokens(&f.statement)
                .into_iter()
                .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
                .collect()
        })
        .collect();

    let mut contradictions = Vec::new();
    let mut contradicted: HashSet<usize> = HashSet::new();

    for i in 0..facts.len() {
        for j in (i + 1)..facts.len() {
            if facts[i].source == facts[j].source {
                continue;
            }
            if jaccard(&content_sets[i], &content_sets[j]) <= RELATED_TOPIC_SIMILARITY {
                continue;
            }

            let Some((kind, value_a, value_b)) =
                conflict_between(&facts[i].statement, &facts[j].statement)
            else {
                continue;
            };

            contradictions.push(Contradiction {
                fact_a: facts[i].id,
                fact_b: facts[j].id,
                kind,
                value_a,
                value_b,
            });
            contradicted.insert(i);
            contradicted.insert(j);
        }
    }

    for (i, fact) in facts.iter_mut().enumerate() {
        fact.contradicted = contradicted.contains(&i);
    }

    contradictions
}

fn conflict_between(a: &str, b: &str) -> Option<(ContradictionKind, String, String)> {
    // Year conflicts take precedence.
    let years_a = extract_years(a);
    let years_b = extract_years(b);
    if let (Some(&ya), Some(&yb)) = (years_a.first(), years_b.first()) {
        if ya != yb && !years_a.iter().any(|y| years_b.contains(y)) {
            return Some((ContradictionKind::Year, ya.to_string(), yb.to_string()));
        }
    }

    // Numeric conflicts: closest pair still differs by >20%.
    let nums_a = extract_numbers(a);
    let nums_b = extract_numbers(b);
    if !nums_a.is_empty() && !nums_b.is_empty() {
        let mut best: Option<(f64, f64, f64)> = None;
        for &x in &nums_a {
            for &y in &nums_b {
                let scale = x.abs().max(y.abs());
                if scale == 0.0 {
                    continue;
                }
                let ratio = (x - y).abs() / scale;
                if best.map_or(true, |(r, _, _)| ratio < r) {
                    best = Some((ratio, x, y));
                }
            }
        }
        if let Some((ratio, x, y)) = best {
            if ratio > NUMERIC_CONFLICT_RATIO {
                return Some((ContradictionKind::Numeric, x.to_string(), y.to_string()));
            }
        }
    }

    // Boolean conflicts: one side negates, the other does not.
    let negated = |s: &str| {
        let toks = tokens(s);
        NEGATION_MARKERS.iter().any(|m| toks.contains(*m))
    };
    let (na, nb) = (negated(a), negated(b));
    if na != nb {
        let value = |n: bool| if n { "negated" } else { "affirmative" };
        return Some((
            ContradictionKind::Boolean,
            value(na).to_string(),
            value(nb).to_string(),
        ));
    }

    None
}
