//! End-to-end pipeline scenarios driven through the orchestrator with mock
//! provider and completion backends. No network, no live services.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use deepresearch_common::config::{RetryConfig, Settings};
use deepresearch_common::types::{Entity, Phase, PrivacyMode, ResearchDomain};
use deepresearch_engine::circuit_breaker::CircuitBreakerRegistry;
use deepresearch_engine::llm::{
    Completion, CompletionBackend, CompletionRequest, LlmError, LlmRouter, ModelCatalog,
    TokenUsage,
};
use deepresearch_engine::memory::MemoryStore;
use deepresearch_engine::orchestrator::Orchestrator;
use deepresearch_engine::providers::{
    GovernedProvider, ProviderError, ProviderFleet, SearchBackend,
};
use deepresearch_engine::rate_limiter::RateLimiter;
use deepresearch_fetch::{ContentFetcher, FetchConfig};

// ---------------------------------------------------------------------------
// Mock search backend
// ---------------------------------------------------------------------------

struct MockSearch {
    name: &'static str,
    /// Template results returned on every call.
    results: Vec<Entity>,
    /// When set, every call fails with this HTTP status.
    fail_status: Option<u16>,
    calls: AtomicUsize,
    /// Extra latency per call, to give cancellation a window.
    delay: Duration,
}

impl MockSearch {
    fn new(name: &'static str, results: Vec<Entity>) -> Self {
        Self {
            name,
            results,
            fail_status: None,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn failing(name: &'static str, status: u16) -> Self {
        Self {
            name,
            results: Vec::new(),
            fail_status: Some(status),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }
}

impl SearchBackend for MockSearch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn rps(&self) -> f64 {
        1_000.0
    }

    fn is_available(&self) -> bool {
        true
    }

    fn search<'a>(
        &'a self,
        _query: &'a str,
        _max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Entity>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(status) = self.fail_status {
                return Err(ProviderError::Status(status));
            }
            Ok(self.results.clone())
        })
    }
}

/// An entity whose content embeds extractable FACT lines for the mock LLM.
fn entity_with_facts(url: &str, title: &str, provider: &str, facts: &[&str]) -> Entity {
    let mut entity = Entity::new(url, title, "snippet", provider);
    let content: String = facts
        .iter()
        .map(|f| format!("FACT: {}\n", f))
        .collect::<String>()
        + "Filler prose around the claims.";
    entity.content = Some(content);
    entity.score = Some(0.8);
    entity
}

// ---------------------------------------------------------------------------
// Mock completion backend
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MockCompletion {
    name: &'static str,
    /// Concrete model ids this backend was called with.
    models_called: Mutex<Vec<String>>,
}

impl MockCompletion {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            models_called: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.models_called.lock().unwrap().clone()
    }

    fn answer(request: &CompletionRequest) -> String {
        let system = request
            .messages
            .iter()
            .find(|m| matches!(m.role, deepresearch_engine::llm::Role::System))
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, deepresearch_engine::llm::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if system.contains("extract atomic factual claims") {
            let facts: Vec<serde_json::Value> = user
                .lines()
                .filter_map(|line| line.trim().strip_prefix("FACT: "))
                .map(|statement| serde_json::json!({"statement": statement, "confidence": 0.8}))
                .collect();
            return serde_json::to_string(&facts).unwrap();
        }
        if system.contains("Classify the research query") {
            return "general".to_string();
        }
        if system.contains("supports a claim") {
            return "yes".to_string();
        }
        "The gathered evidence is summarized here in two short paragraphs.".to_string()
    }
}

impl CompletionBackend for MockCompletion {
    fn name(&self) -> &'static str {
        self.name
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            self.models_called
                .lock()
                .unwrap()
                .push(request.model.clone());
            Ok(Completion {
                text: Self::answer(request),
                usage: TokenUsage {
                    input_tokens: 50,
                    output_tokens: 20,
                },
            })
        })
    }

    fn complete_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            self.models_called
                .lock()
                .unwrap()
                .push(request.model.clone());
            let text = Self::answer(request);
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                let mid = text.len() / 2;
                let _ = tx.send(text[..mid].to_string()).await;
                let _ = tx.send(text[mid..].to_string()).await;
            });
            Ok(rx)
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn test_settings() -> Settings {
    let mut settings = Settings::from_env();
    settings.data_dir =
        std::env::temp_dir().join(format!("deepresearch-test-{}", uuid::Uuid::new_v4()));
    settings.retry = fast_retry();
    settings.safety.max_cycles = 4;
    settings.safety.parallel_providers = 4;
    settings
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    local: Arc<MockCompletion>,
    cloud: Arc<MockCompletion>,
    memory: Arc<MemoryStore>,
}

async fn harness_with(
    backends: Vec<Arc<dyn SearchBackend>>,
    breakers: Arc<CircuitBreakerRegistry>,
    settings: Settings,
) -> Harness {
    let limiter = Arc::new(RateLimiter::new());
    let settings = Arc::new(settings);

    let providers = backends
        .into_iter()
        .map(|backend| {
            Arc::new(GovernedProvider::new(
                backend,
                Arc::clone(&breakers),
                Arc::clone(&limiter),
                settings.retry.clone(),
                Duration::from_secs(5),
            ))
        })
        .collect();
    let fleet = Arc::new(ProviderFleet::new(providers));

    let local = Arc::new(MockCompletion::new("mock-local"));
    let cloud = Arc::new(MockCompletion::new("mock-cloud"));
    let router = Arc::new(LlmRouter::new(
        Some(Arc::clone(&local) as Arc<dyn CompletionBackend>),
        Some(Arc::clone(&cloud) as Arc<dyn CompletionBackend>),
        ModelCatalog::default(),
        settings.retry.clone(),
        settings.timeouts.clone(),
    ));

    let fetcher = Arc::new(ContentFetcher::new(FetchConfig {
        min_delay_ms: 0,
        max_delay_ms: 0,
        ..FetchConfig::default()
    }));

    let memory = Arc::new(MemoryStore::in_memory().await.unwrap());

    let orchestrator = Arc::new(Orchestrator::new(
        fleet,
        fetcher,
        router,
        Arc::clone(&memory),
        settings,
    ));

    Harness {
        orchestrator,
        local,
        cloud,
        memory,
    }
}

/// Poll until the session reaches a terminal phase.
async fn wait_terminal(
    orchestrator: &Orchestrator,
    id: deepresearch_common::SessionId,
) -> deepresearch_common::api::StatusResponse {
    for _ in 0..600 {
        let status = orchestrator.status(id).await.unwrap();
        if status.current_phase.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not reach a terminal phase in time");
}

fn academic_corpus() -> Vec<Arc<dyn SearchBackend>> {
    let alpha = MockSearch::new(
        "alpha",
        vec![
            entity_with_facts(
                "https://journals.example/wheat-1",
                "Wheat under warming",
                "alpha",
                &[
                    "Global wheat yields decline about 6 percent per degree of warming",
                    "Heat stress during grain filling reduces kernel weight",
                    "Irrigated wheat systems are less exposed to yield loss",
                ],
            ),
            entity_with_facts(
                "https://journals.example/wheat-2",
                "Regional yield projections",
                "alpha",
                &[
                    "South Asian wheat belts face the largest projected losses",
                    "CO2 fertilization partially offsets heat-driven losses",
                ],
            ),
        ],
    );

    let beta = MockSearch::new(
        "beta",
        vec![
            entity_with_facts(
                "https://preprints.example/wheat-3",
                "Meta-analysis of warming trials",
                "beta",
                &[
                    "Global wheat yields decline about 6 percent per degree of warming",
                    "Field warming experiments corroborate model projections",
                    "Adaptation through earlier sowing recovers part of the loss",
                ],
            ),
            entity_with_facts(
                "https://preprints.example/wheat-4",
                "Drought interactions",
                "beta",
                &[
                    "Combined heat and drought cause disproportionate yield damage",
                    "Breeding for heat tolerance shows single digit gains per decade",
                ],
            ),
        ],
    );

    let gamma = MockSearch::new(
        "gamma",
        vec![entity_with_facts(
            "https://openaccess.example/wheat-5",
            "Historical yield records",
            "gamma",
            &[
                "Observed yield stagnation in Europe coincides with hotter summers",
                "Wheat quality protein content falls under elevated CO2",
            ],
        )],
    );

    vec![Arc::new(alpha), Arc::new(beta), Arc::new(gamma)]
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_academic_happy_path() {
    let harness = harness_with(
        academic_corpus(),
        Arc::new(CircuitBreakerRegistry::default()),
        test_settings(),
    )
    .await;

    let id = harness
        .orchestrator
        .start_research(
            "effects of climate change on wheat yields",
            PrivacyMode::CloudAllowed,
        )
        .await
        .unwrap();

    let status = wait_terminal(&harness.orchestrator, id).await;
    assert_eq!(status.current_phase, Phase::Complete);

    let report = harness.orchestrator.report(id).await.unwrap();
    assert_eq!(report.domain, "academic");
    assert!(report.methodology.sources_queried.len() >= 3);
    assert!(report.methodology.facts_extracted >= 10);
    assert!(
        report.methodology.stop_reason == "saturation_reached"
            || report.methodology.stop_reason == "max_cycles"
    );
    assert!((0.5..=1.0).contains(&report.overall_confidence));
    assert!(report.contradictions_found <= 1);

    // Fact provenance: every finding's source is a collected entity URL.
    let status = harness.orchestrator.status(id).await.unwrap();
    assert!(report.findings.len() == report.methodology.facts_extracted);
    assert!(status.entities_found >= report.sources.len());
    for finding in &report.findings {
        assert!(
            report.sources.iter().any(|s| s.url == finding.source),
            "finding source {} missing from entity set",
            finding.source
        );
    }

    // Stop determinism: exactly one stop reason.
    assert!(status.stop_reason.is_some());
}

#[tokio::test]
async fn test_local_only_privacy_never_calls_cloud() {
    let backends: Vec<Arc<dyn SearchBackend>> = vec![Arc::new(MockSearch::new(
        "alpha",
        vec![entity_with_facts(
            "https://medline.example/cough",
            "Persistent cough review",
            "alpha",
            &[
                "Most persistent coughs resolve without intervention within eight weeks",
                "Post-viral cough is the most common cause in adults",
            ],
        )],
    ))];

    let harness = harness_with(
        backends,
        Arc::new(CircuitBreakerRegistry::default()),
        test_settings(),
    )
    .await;

    // Medical domain verifies against primary sources by default; disable it
    // through the override mechanism so the test stays offline.
    harness
        .memory
        .set_domain_override(
            ResearchDomain::Medical,
            &serde_json::json!({"verification": {"enabled": false, "top_n": 5}}),
        )
        .await
        .unwrap();

    let id = harness
        .orchestrator
        .start_research(
            "my medical symptoms: persistent cough diagnosis and treatment",
            PrivacyMode::LocalOnly,
        )
        .await
        .unwrap();

    let status = wait_terminal(&harness.orchestrator, id).await;
    assert_eq!(status.current_phase, Phase::Complete);

    // Report produced entirely locally.
    let report = harness.orchestrator.report(id).await.unwrap();
    assert!(!report.findings.is_empty());

    // The privacy invariant: zero cloud calls, local tiers only.
    assert!(harness.cloud.calls().is_empty(), "cloud backend was called");
    let catalog = ModelCatalog::default();
    for model in harness.local.calls() {
        assert!(
            model == catalog.local_fast || model == catalog.local_powerful,
            "non-local model {} used in local-only session",
            model
        );
    }
}

#[tokio::test]
async fn test_provider_outage_opens_circuit_and_session_completes() {
    let flaky = Arc::new(MockSearch::failing("flaky", 503));
    let healthy = Arc::new(MockSearch::new(
        "healthy",
        vec![entity_with_facts(
            "https://stable.example/doc",
            "Stable source",
            "healthy",
            &[
                "The healthy provider keeps contributing results",
                "Circuit isolation keeps providers independent",
            ],
        )],
    ));

    let mut settings = test_settings();
    settings.safety.max_cycles = 3;

    // Low threshold so the outage opens the circuit within one run.
    let breakers = Arc::new(CircuitBreakerRegistry::new(2, Duration::from_secs(600)));
    let harness = harness_with(
        vec![
            flaky.clone() as Arc<dyn SearchBackend>,
            healthy as Arc<dyn SearchBackend>,
        ],
        Arc::clone(&breakers),
        settings,
    )
    .await;

    let id = harness
        .orchestrator
        .start_research("research paper study of circuit experiments", PrivacyMode::CloudAllowed)
        .await
        .unwrap();

    let status = wait_terminal(&harness.orchestrator, id).await;
    assert_eq!(status.current_phase, Phase::Complete);

    // The flaky provider's circuit opened; the healthy one was untouched.
    assert_eq!(
        breakers.for_provider("flaky").current_state(),
        deepresearch_engine::circuit_breaker::CircuitState::Open
    );
    assert_eq!(
        breakers.for_provider("healthy").current_state(),
        deepresearch_engine::circuit_breaker::CircuitState::Closed
    );

    let report = harness.orchestrator.report(id).await.unwrap();
    assert!(report.methodology.sources_queried.contains(&"healthy".to_string()));
    assert!(!report.methodology.sources_queried.contains(&"flaky".to_string()));
}

#[tokio::test]
async fn test_injected_contradiction_detected_as_year_conflict() {
    let backends: Vec<Arc<dyn SearchBackend>> = vec![
        Arc::new(MockSearch::new(
            "alpha",
            vec![entity_with_facts(
                "https://alpha.example/profile",
                "Company profile",
                "alpha",
                &["The company was founded in 2010"],
            )],
        )),
        Arc::new(MockSearch::new(
            "beta",
            vec![entity_with_facts(
                "https://beta.example/about",
                "About page",
                "beta",
                &["The company was established in 2015"],
            )],
        )),
    ];

    let harness = harness_with(
        backends,
        Arc::new(CircuitBreakerRegistry::default()),
        test_settings(),
    )
    .await;

    let id = harness
        .orchestrator
        .start_research(
            "research study of the company founding history",
            PrivacyMode::CloudAllowed,
        )
        .await
        .unwrap();

    wait_terminal(&harness.orchestrator, id).await;
    let report = harness.orchestrator.report(id).await.unwrap();

    assert!(report.contradictions_found >= 1);

    // Both facts present, each below its extraction confidence of 0.8.
    let founded: Vec<_> = report
        .findings
        .iter()
        .filter(|f| f.statement.contains("2010") || f.statement.contains("2015"))
        .collect();
    assert_eq!(founded.len(), 2);
    for finding in founded {
        assert!(finding.confidence < 0.8);
    }
}

#[tokio::test]
async fn test_cancellation_preserves_partial_results() {
    let mut slow = MockSearch::new(
        "slow",
        vec![entity_with_facts(
            "https://slow.example/doc",
            "Slow source",
            "slow",
            &["A first cycle still lands results before cancellation"],
        )],
    );
    slow.delay = Duration::from_millis(150);

    let mut settings = test_settings();
    settings.safety.max_cycles = 10;

    let harness = harness_with(
        vec![Arc::new(slow) as Arc<dyn SearchBackend>],
        Arc::new(CircuitBreakerRegistry::default()),
        settings,
    )
    .await;

    let id = harness
        .orchestrator
        .start_research(
            "long running research study of experiment cancellation",
            PrivacyMode::CloudAllowed,
        )
        .await
        .unwrap();

    // Wait until the first collect produced entities, then stop.
    for _ in 0..600 {
        let status = harness.orchestrator.status(id).await.unwrap();
        if status.entities_found > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    harness.orchestrator.stop(id).await.unwrap();

    let status = wait_terminal(&harness.orchestrator, id).await;
    assert!(status.current_phase.is_terminal());
    assert_eq!(status.stop_reason.as_deref(), Some("cancelled"));
    assert!(status.entities_found > 0, "partial results were lost");
}

#[tokio::test]
async fn test_tiny_corpus_saturates_quickly() {
    let backends: Vec<Arc<dyn SearchBackend>> = vec![Arc::new(MockSearch::new(
        "tiny",
        vec![entity_with_facts(
            "https://tiny.example/only",
            "The only page",
            "tiny",
            &["A tiny corpus stops adding information after one pass"],
        )],
    ))];

    let harness = harness_with(
        backends,
        Arc::new(CircuitBreakerRegistry::default()),
        test_settings(),
    )
    .await;

    let id = harness
        .orchestrator
        .start_research(
            "research study of a deliberately tiny corpus",
            PrivacyMode::CloudAllowed,
        )
        .await
        .unwrap();

    let status = wait_terminal(&harness.orchestrator, id).await;
    assert_eq!(status.stop_reason.as_deref(), Some("saturation_reached"));
    assert!(status.cycle <= 3);
    assert!(status.saturation_metrics.overall >= 0.85);
}

#[tokio::test]
async fn test_perpetual_500_terminates_with_graceful_degradation() {
    let flaky = Arc::new(MockSearch::failing("always500", 500));
    let breakers = Arc::new(CircuitBreakerRegistry::new(100, Duration::from_secs(60)));
    let limiter = Arc::new(RateLimiter::new());

    let governed = GovernedProvider::new(
        flaky.clone() as Arc<dyn SearchBackend>,
        breakers,
        limiter,
        fast_retry(),
        Duration::from_secs(5),
    );

    let cancelled = std::sync::atomic::AtomicBool::new(false);
    let results = governed.search("q", 5, &cancelled).await.unwrap();

    // Degraded to empty, not hung, not thrown; retries stopped at the cap.
    assert!(results.entities.is_empty());
    assert_eq!(results.skipped, Some("provider_error"));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_synthesize_is_idempotent_over_session_state() {
    use deepresearch_common::types::{Fact, ResearchSession, StopReason};
    use deepresearch_engine::pipeline::{NodeContext, PipelineNode, SynthesizeNode};

    let local = Arc::new(MockCompletion::new("mock-local"));
    let router = Arc::new(LlmRouter::new(
        Some(Arc::clone(&local) as Arc<dyn CompletionBackend>),
        None,
        ModelCatalog::default(),
        fast_retry(),
        deepresearch_common::config::TimeoutConfig::default(),
    ));

    let (progress, _rx) = tokio::sync::broadcast::channel(16);
    let ctx = NodeContext {
        fleet: Arc::new(ProviderFleet::new(Vec::new())),
        fetcher: Arc::new(ContentFetcher::new(FetchConfig::default())),
        router,
        memory: Arc::new(MemoryStore::in_memory().await.unwrap()),
        settings: Arc::new(test_settings()),
        cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        progress,
    };

    let mut session = ResearchSession::new("wheat yields", PrivacyMode::CloudAllowed);
    session.add_entity(entity_with_facts("https://a.example/1", "A", "alpha", &[]));
    session.add_entity(entity_with_facts("https://b.example/2", "B", "alpha", &[]));
    session.add_fact(Fact::new("yields fell by six percent", "https://a.example/1", 0.7, "llm"));
    session.add_fact(Fact::new("heat stress reduces kernel weight", "https://b.example/2", 0.9, "llm"));
    session.stop_reason = Some(StopReason::SaturationReached);

    let node = SynthesizeNode;

    let mut first = session.clone();
    node.run(&ctx, &mut first).await.unwrap();
    let mut second = session.clone();
    node.run(&ctx, &mut second).await.unwrap();

    let (a, b) = (first.report.unwrap(), second.report.unwrap());
    let statements = |r: &deepresearch_common::types::Report| {
        r.findings.iter().map(|f| f.statement.clone()).collect::<Vec<_>>()
    };
    assert_eq!(statements(&a), statements(&b));
    assert_eq!(a.overall_confidence, b.overall_confidence);
}

#[tokio::test]
async fn test_effectiveness_learned_after_completion() {
    let harness = harness_with(
        academic_corpus(),
        Arc::new(CircuitBreakerRegistry::default()),
        test_settings(),
    )
    .await;

    let id = harness
        .orchestrator
        .start_research(
            "effects of climate change on wheat yields",
            PrivacyMode::CloudAllowed,
        )
        .await
        .unwrap();
    wait_terminal(&harness.orchestrator, id).await;

    // All three providers contributed facts, so all carry a positive score.
    let scores = harness
        .memory
        .effectiveness(ResearchDomain::Academic)
        .await
        .unwrap();
    for provider in ["alpha", "beta", "gamma"] {
        assert!(
            scores.get(provider).copied().unwrap_or(0.0) > 0.0,
            "provider {} missing from effectiveness table",
            provider
        );
    }
}
