use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use deepresearch_common::config::Settings;
use deepresearch_engine::circuit_breaker::CircuitBreakerRegistry;
use deepresearch_engine::export::ExportRegistry;
use deepresearch_engine::health;
use deepresearch_engine::llm::{
    AnthropicClient, CompletionBackend, LlmRouter, ModelCatalog, OllamaClient,
};
use deepresearch_engine::memory::{EmbeddingClient, MemoryStore};
use deepresearch_engine::orchestrator::Orchestrator;
use deepresearch_engine::providers::ProviderFleet;
use deepresearch_engine::rate_limiter::RateLimiter;
use deepresearch_engine::routes::{self, AppState};
use deepresearch_fetch::{ContentFetcher, FetchConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Deep research engine starting");

    // Configuration — fail loudly on misconfiguration.
    let settings = Settings::from_env();
    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "Invalid configuration — refusing to start");
        std::process::exit(1);
    }
    let settings = Arc::new(settings);

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Process-scoped governance objects.
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let limiter = Arc::new(RateLimiter::new());

    let fetcher = Arc::new(ContentFetcher::new(FetchConfig {
        load_timeout: Duration::from_secs(settings.timeouts.fetch_load_secs),
        idle_timeout: Duration::from_secs(settings.timeouts.fetch_idle_secs),
        ..FetchConfig::default()
    }));

    // LLM backends. Ollama is always constructed; the startup probe decides
    // whether it counts as available.
    let ollama = Arc::new(OllamaClient::new(
        &settings.ollama_base_url,
        settings.ollama_num_parallel,
    ));
    let anthropic = settings
        .anthropic_api_key
        .as_deref()
        .map(|key| Arc::new(AnthropicClient::new(key)));

    let fleet = Arc::new(ProviderFleet::from_settings(
        &settings,
        Arc::clone(&fetcher),
        Arc::clone(&breakers),
        Arc::clone(&limiter),
    ));

    // Startup gate: probes, credential format checks, data dir, playbooks.
    let startup = health::run_startup_checks(&settings, Some(&*ollama), &fleet).await;
    if !startup.pass {
        std::process::exit(1);
    }

    let local_ok = startup
        .feature("ollama")
        .is_some_and(|f| f.state == health::FeatureState::Enabled);

    let router = Arc::new(LlmRouter::new(
        local_ok.then(|| Arc::clone(&ollama) as Arc<dyn CompletionBackend>),
        anthropic.map(|c| c as Arc<dyn CompletionBackend>),
        ModelCatalog::default(),
        settings.retry.clone(),
        settings.timeouts.clone(),
    ));

    // Embeddings ride the local backend; without it the vector path degrades.
    let embedder = local_ok.then(|| {
        Arc::new(EmbeddingClient::new(
            &settings.ollama_base_url,
            "nomic-embed-text",
            settings.retry.clone(),
        ))
    });

    let memory = match MemoryStore::open(&settings.data_dir, embedder).await {
        Ok(memory) => Arc::new(memory),
        Err(e) => {
            tracing::error!(error = %e, "Failed to open memory store");
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&fleet),
        Arc::clone(&fetcher),
        Arc::clone(&router),
        Arc::clone(&memory),
        Arc::clone(&settings),
    ));

    // Periodic circuit breaker state gauges.
    {
        let breakers = Arc::clone(&breakers);
        tokio::spawn(async move {
            let interval = Duration::from_secs(30);
            loop {
                tokio::time::sleep(interval).await;
                breakers.report_metrics();
            }
        });
    }

    let state = Arc::new(AppState {
        orchestrator,
        settings: Arc::clone(&settings),
        memory,
        fetcher,
        exports: ExportRegistry::new(),
        breakers,
        startup,
        metrics_handle,
    });

    let app = routes::router(state);

    let listener =
        match tokio::net::TcpListener::bind((settings.host.as_str(), settings.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "Failed to bind TCP listener");
                std::process::exit(2);
            }
        };

    tracing::info!(host = %settings.host, port = settings.port, "Engine listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    });

    if let Err(e) = serve.await {
        tracing::error!(error = %e, "HTTP server error");
        std::process::exit(2);
    }

    tracing::info!("Engine shut down cleanly");
}
