mod arxiv;
mod brave;
mod crawler;
mod exa;
mod pubmed;
mod semantic_scholar;
mod tavily;
mod unpaywall;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deepresearch_common::config::Settings;
use deepresearch_common::types::{DomainConfiguration, Entity};
use deepresearch_common::{ResearchError, Result};
use deepresearch_fetch::ContentFetcher;

use crate::circuit_breaker::{CallOutcome, CircuitBreakerRegistry, CircuitState};
use crate::rate_limiter::RateLimiter;
use crate::retry::{retry_with_backoff, RetryClass, Retryable};

pub use arxiv::ArxivProvider;
pub use brave::BraveProvider;
pub use crawler::CrawlerProvider;
pub use exa::ExaProvider;
pub use pubmed::PubMedProvider;
pub use semantic_scholar::SemanticScholarProvider;
pub use tavily::TavilyProvider;
pub use unpaywall::UnpaywallProvider;

/// Errors raised inside a provider backend. These never escape the governed
/// `search` contract — they are converted to empty results plus a recorded
/// failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for ProviderError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(_) | Self::Timeout(_) => RetryClass::Retryable,
            Self::Status(code) => {
                // 5xx and 408 retry; other 4xx are fatal.
                if *code >= 500 || *code == 408 {
                    RetryClass::Retryable
                } else {
                    RetryClass::Fatal
                }
            }
            Self::RateLimited { retry_after } => RetryClass::RateLimited {
                retry_after: *retry_after,
            },
            Self::Auth(_) | Self::Parse(_) => RetryClass::Fatal,
        }
    }
}

/// Uniform query capability over heterogeneous search backends.
///
/// Object-safe so the fleet holds `Arc<dyn SearchBackend>`; tests provide
/// scripted mocks the same way.
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sustained requests per second this backend tolerates.
    fn rps(&self) -> f64;

    /// Whether the backend is usable (credentials present).
    fn is_available(&self) -> bool;

    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Vec<Entity>, ProviderError>> + Send + 'a>>;
}

/// Result of one governed provider query.
#[derive(Debug)]
pub struct ProviderResults {
    pub provider: String,
    pub entities: Vec<Entity>,
    /// Set when the query was skipped (open circuit) or degraded to empty
    /// (transport failure after retries), with the machine code.
    pub skipped: Option<&'static str>,
}

/// A backend wrapped with the governance stack: circuit-breaker check, rate
/// limiter acquire, retry engine, structured logging. The wrapped `search`
/// never fails except for cancellation.
pub struct GovernedProvider {
    backend: Arc<dyn SearchBackend>,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Arc<RateLimiter>,
    retry: deepresearch_common::config::RetryConfig,
    call_timeout: Duration,
}

impl GovernedProvider {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Arc<RateLimiter>,
        retry: deepresearch_common::config::RetryConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            breakers,
            limiter,
            retry,
            call_timeout,
        }
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breakers.for_provider(self.backend.name()).current_state()
    }

    /// Query the backend under full governance. Transport errors degrade to
    /// empty results; only cancellation propagates.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        cancelled: &AtomicBool,
    ) -> Result<ProviderResults> {
        let name = self.backend.name();

        if cancelled.load(Ordering::Relaxed) {
            return Err(ResearchError::Cancelled);
        }

        let breaker = self.breakers.for_provider(name);
        if !breaker.can_execute() {
            tracing::warn!(provider = name, "circuit_open — skipping provider");
            metrics::counter!("provider.skipped", "provider" => name, "reason" => "circuit_open")
                .increment(1);
            return Ok(ProviderResults {
                provider: name.to_string(),
                entities: Vec::new(),
                skipped: Some("circuit_open"),
            });
        }

        if let Err(e) = self
            .limiter
            .acquire(name, self.backend.rps(), self.call_timeout)
            .await
        {
            tracing::warn!(provider = name, error = %e, "Rate limit deadline reached");
            return Ok(ProviderResults {
                provider: name.to_string(),
                entities: Vec::new(),
                skipped: Some("rate_limit_deadline"),
            });
        }

        let start = std::time::Instant::now();
        let timeout = self.call_timeout;
        let outcome = retry_with_backoff(&self.retry, name, || async move {
            tokio::time::timeout(timeout, self.backend.search(query, max_results))
                .await
                .map_err(|_| ProviderError::Timeout(timeout))?
        })
        .await;

        metrics::histogram!("provider.latency", "provider" => name)
            .record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(mut entities) => {
                breaker.record(CallOutcome::Success);
                entities.truncate(max_results);
                tracing::info!(
                    provider = name,
                    results = entities.len(),
                    "Provider query complete"
                );
                metrics::counter!("provider.queries", "provider" => name).increment(1);
                Ok(ProviderResults {
                    provider: name.to_string(),
                    entities,
                    skipped: None,
                })
            }
            Err(e) => {
                breaker.record(CallOutcome::Failure);
                tracing::warn!(provider = name, error = %e, "Provider query failed, degrading");
                metrics::counter!("provider.errors", "provider" => name).increment(1);
                Ok(ProviderResults {
                    provider: name.to_string(),
                    entities: Vec::new(),
                    skipped: Some("provider_error"),
                })
            }
        }
    }
}

/// The process-wide provider fleet with the Collect selection policy.
pub struct ProviderFleet {
    providers: Vec<Arc<GovernedProvider>>,
}

impl ProviderFleet {
    pub fn new(providers: Vec<Arc<GovernedProvider>>) -> Self {
        Self { providers }
    }

    /// Build the fleet from settings: one governed wrapper per backend whose
    /// credentials are present.
    pub fn from_settings(
        settings: &Settings,
        fetcher: Arc<ContentFetcher>,
        breakers: Arc<CircuitBreakerRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let backends: Vec<Arc<dyn SearchBackend>> = vec![
            Arc::new(TavilyProvider::new(settings.tavily_api_key.clone())),
            Arc::new(BraveProvider::new(settings.brave_api_key.clone())),
            Arc::new(ExaProvider::new(settings.exa_api_key.clone())),
            Arc::new(SemanticScholarProvider::new(
                settings.semantic_scholar_api_key.clone(),
            )),
            Arc::new(PubMedProvider::new()),
            Arc::new(ArxivProvider::new()),
            Arc::new(UnpaywallProvider::new(settings.unpaywall_email.clone())),
            Arc::new(CrawlerProvider::new(fetcher)),
        ];

        let providers = backends
            .into_iter()
            .map(|backend| {
                Arc::new(GovernedProvider::new(
                    backend,
                    Arc::clone(&breakers),
                    Arc::clone(&limiter),
                    settings.retry.clone(),
                    Duration::from_secs(settings.timeouts.provider_secs),
                ))
            })
            .collect();

        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<GovernedProvider>> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    pub fn available_names(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.name())
            .collect()
    }

    /// Order available providers for a Collect fan-out: domain-configured
    /// priority first, then persisted effectiveness, with open circuits
    /// pushed to the back.
    pub fn select(
        &self,
        domain_config: &DomainConfiguration,
        effectiveness: &std::collections::HashMap<String, f64>,
    ) -> Vec<Arc<GovernedProvider>> {
        let priority_of = |name: &str| {
            domain_config
                .preferred_providers
                .iter()
                .position(|p| p == name)
                .unwrap_or(domain_config.preferred_providers.len())
        };

        let mut candidates: Vec<Arc<GovernedProvider>> = self
            .providers
            .iter()
            .filter(|p| p.is_available())
            .map(Arc::clone)
            .collect();

        candidates.sort_by(|a, b| {
            let circuit_rank = |p: &GovernedProvider| match p.circuit_state() {
                CircuitState::Closed | CircuitState::HalfOpen => 0,
                CircuitState::Open => 1,
            };
            let ema = |p: &GovernedProvider| {
                effectiveness.get(p.name()).copied().unwrap_or(0.5)
            };

            priority_of(a.name())
                .cmp(&priority_of(b.name()))
                .then(
                    ema(b)
                        .partial_cmp(&ema(a))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(circuit_rank(a).cmp(&circuit_rank(b)))
                .then(a.name().cmp(b.name()))
        });

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepresearch_common::types::ResearchDomain;

    struct FakeBackend {
        name: &'static str,
        available: bool,
    }

    impl SearchBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn rps(&self) -> f64 {
            100.0
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn search<'a>(
            &'a self,
            _query: &'a str,
            _max_results: usize,
        ) -> Pin<
            Box<dyn Future<Output = std::result::Result<Vec<Entity>, ProviderError>> + Send + 'a>,
        > {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    fn governed(name: &'static str, available: bool) -> Arc<GovernedProvider> {
        Arc::new(GovernedProvider::new(
            Arc::new(FakeBackend { name, available }),
            Arc::new(CircuitBreakerRegistry::default()),
            Arc::new(RateLimiter::new()),
            deepresearch_common::config::RetryConfig::default(),
            Duration::from_secs(5),
        ))
    }

    #[test]
    fn test_selection_honors_domain_priority() {
        let fleet = ProviderFleet::new(vec![
            governed("tavily", true),
            governed("pubmed", true),
            governed("arxiv", true),
            governed("offline", false),
        ]);

        let config = DomainConfiguration {
            preferred_providers: vec!["pubmed".into(), "arxiv".into(), "tavily".into()],
            ..DomainConfiguration::default_for(ResearchDomain::Medical)
        };

        let selected = fleet.select(&config, &std::collections::HashMap::new());
        let names: Vec<_> = selected.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["pubmed", "arxiv", "tavily"]);
    }

    #[test]
    fn test_selection_breaks_priority_ties_with_effectiveness() {
        let fleet = ProviderFleet::new(vec![governed("a", true), governed("b", true)]);

        let config = DomainConfiguration {
            preferred_providers: Vec::new(),
            ..DomainConfiguration::default_for(ResearchDomain::General)
        };

        let mut effectiveness = std::collections::HashMap::new();
        effectiveness.insert("b".to_string(), 0.9);
        effectiveness.insert("a".to_string(), 0.1);

        let selected = fleet.select(&config, &effectiveness);
        assert_eq!(selected[0].name(), "b");
    }

    #[tokio::test]
    async fn test_open_circuit_degrades_to_empty() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(1, Duration::from_secs(600)));
        breakers.for_provider("tavily").record(CallOutcome::Failure);

        let provider = GovernedProvider::new(
            Arc::new(FakeBackend {
                name: "tavily",
                available: true,
            }),
            breakers,
            Arc::new(RateLimiter::new()),
            deepresearch_common::config::RetryConfig::default(),
            Duration::from_secs(5),
        );

        let cancelled = AtomicBool::new(false);
        let results = provider.search("q", 5, &cancelled).await.unwrap();
        assert!(results.entities.is_empty());
        assert_eq!(results.skipped, Some("circuit_open"));
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let provider = governed("tavily", true);
        let cancelled = AtomicBool::new(true);
        let err = provider.search("q", 5, &cancelled).await.unwrap_err();
        assert!(matches!(err, ResearchError::Cancelled));
    }
}
