use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime settings, assembled from environment variables.
///
/// Provider keys are optional — a missing key disables that provider and
/// degrades the feature matrix. The engine refuses to start only when no LLM
/// backend at all is reachable.
#[derive(Clone, Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub data_dir: PathBuf,

    pub anthropic_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub brave_api_key: Option<String>,
    pub exa_api_key: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    pub unpaywall_email: Option<String>,

    pub ollama_base_url: String,
    pub ollama_num_parallel: u32,

    pub safety: SafetyLimits,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
}

/// Per-session budgets. Exhaustion is a normal stop condition, not an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Hard cap on collect/evaluate cycles.
    pub max_cycles: u32,
    /// Hard cap on accumulated entities per session.
    pub max_entities: usize,
    /// Cumulative content-fetch wall-clock budget.
    pub max_fetch_seconds: u64,
    /// Cumulative LLM token budget (input + output).
    pub max_llm_tokens: u64,
    /// Max providers queried concurrently in a collect fan-out.
    pub parallel_providers: usize,
    /// Entities enriched with full content per cycle.
    pub enrich_top_k: usize,
    /// Target results requested from each provider.
    pub sources_per_provider: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            max_entities: 100,
            max_fetch_seconds: 300,
            max_llm_tokens: 200_000,
            parallel_providers: 4,
            enrich_top_k: 5,
            sources_per_provider: 8,
        }
    }
}

/// Retry schedule for outbound calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 4_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Timeouts for every class of external call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub provider_secs: u64,
    pub fetch_load_secs: u64,
    pub fetch_idle_secs: u64,
    pub llm_local_secs: u64,
    pub llm_remote_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_secs: 30,
            fetch_load_secs: 30,
            fetch_idle_secs: 10,
            llm_local_secs: 60,
            llm_remote_secs: 120,
        }
    }
}

impl Settings {
    /// Assemble settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            debug: env_parse("DEBUG", false),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),

            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            tavily_api_key: env_opt("TAVILY_API_KEY"),
            brave_api_key: env_opt("BRAVE_API_KEY"),
            exa_api_key: env_opt("EXA_API_KEY"),
            semantic_scholar_api_key: env_opt("SEMANTIC_SCHOLAR_API_KEY"),
            unpaywall_email: env_opt("UNPAYWALL_EMAIL"),

            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            ollama_num_parallel: env_parse("OLLAMA_NUM_PARALLEL", 2),

            safety: SafetyLimits::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Validate numeric ranges. Collects every problem into one message so a
    /// misconfigured deployment surfaces all failures at once.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors: Vec<String> = Vec::new();

        if self.safety.max_cycles == 0 {
            errors.push("safety.max_cycles must be > 0".into());
        }
        if self.safety.max_entities == 0 {
            errors.push("safety.max_entities must be > 0".into());
        }
        if self.safety.parallel_providers == 0 {
            errors.push("safety.parallel_providers must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be > 0".into());
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            errors.push("retry.max_backoff_ms must be >= initial_backoff_ms".into());
        }
        if self.retry.backoff_multiplier < 1.0 {
            errors.push("retry.backoff_multiplier must be >= 1.0".into());
        }
        if self.ollama_num_parallel == 0 {
            errors.push("OLLAMA_NUM_PARALLEL must be > 0".into());
        }
        if self.timeouts.provider_secs == 0 || self.timeouts.fetch_load_secs == 0 {
            errors.push("timeouts must be > 0".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    /// Settings rendered for the diagnostics endpoint, secrets masked.
    pub fn masked(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "port": self.port,
            "debug": self.debug,
            "data_dir": self.data_dir.display().to_string(),
            "anthropic_api_key": mask(&self.anthropic_api_key),
            "tavily_api_key": mask(&self.tavily_api_key),
            "brave_api_key": mask(&self.brave_api_key),
            "exa_api_key": mask(&self.exa_api_key),
            "semantic_scholar_api_key": mask(&self.semantic_scholar_api_key),
            "unpaywall_email": mask(&self.unpaywall_email),
            "ollama_base_url": self.ollama_base_url,
            "ollama_num_parallel": self.ollama_num_parallel,
            "safety": self.safety,
            "retry": self.retry,
            "timeouts": self.timeouts,
        })
    }
}

fn mask(secret: &Option<String>) -> serde_json::Value {
    match secret {
        Some(s) if s.len() > 4 => serde_json::Value::String(format!("***{}", &s[s.len() - 4..])),
        Some(_) => serde_json::Value::String("***".into()),
        None => serde_json::Value::Null,
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
