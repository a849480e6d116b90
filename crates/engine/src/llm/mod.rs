mod anthropic;
mod ollama;
pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use deepresearch_common::config::{RetryConfig, TimeoutConfig};
use deepresearch_common::types::PrivacyMode;
use deepresearch_common::ResearchError;

use crate::retry::{retry_with_backoff, RetryClass, Retryable};

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use types::{ChatMessage, Completion, CompletionRequest, Role, TokenUsage};

/// Logical model names the pipeline selects between. Concrete backend model
/// identifiers live in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalModel {
    LocalFast,
    LocalPowerful,
    CloudBest,
}

impl LogicalModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalFast => "local-fast",
            Self::LocalPowerful => "local-powerful",
            Self::CloudBest => "cloud-best",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalFast | Self::LocalPowerful)
    }
}

/// Coarse task complexity signal for model selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskComplexity {
    Low,
    High,
}

/// Errors from completion backends.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    #[error("LLM timeout: {0}")]
    Timeout(String),

    #[error("No LLM backend available for {0}")]
    Unavailable(String),

    #[error("Privacy policy forbids {0}")]
    Policy(String),
}

impl Retryable for LlmError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(_) | Self::Timeout(_) | Self::Api(_) => RetryClass::Retryable,
            Self::RateLimited { retry_after } => RetryClass::RateLimited {
                retry_after: *retry_after,
            },
            Self::Auth(_) | Self::Parse(_) | Self::Unavailable(_) | Self::Policy(_) => {
                RetryClass::Fatal
            }
        }
    }
}

impl From<LlmError> for ResearchError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Policy(msg) => ResearchError::PolicyViolation(msg),
            other => ResearchError::Llm(other.to_string()),
        }
    }
}

/// Object-safe completion capability. Production backends are the Ollama and
/// Anthropic clients; tests substitute a recording mock.
pub trait CompletionBackend: Send + Sync + std::fmt::Debug {
    /// Human-readable backend name for logs and the feature matrix.
    fn name(&self) -> &'static str;

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>>;

    /// Streamed variant: a lazy finite sequence of chunks whose concatenation
    /// equals the non-streaming result. The receiver may be dropped at any
    /// chunk boundary to cancel.
    fn complete_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, LlmError>> + Send + 'a>>;
}

/// Concrete model identifiers behind the logical names.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    pub local_fast: String,
    pub local_powerful: String,
    pub cloud_best: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            local_fast: "llama3.1:8b".into(),
            local_powerful: "llama3.1:70b".into(),
            cloud_best: "claude-sonnet-4-20250514".into(),
        }
    }
}

/// Routes completions to the local or remote backend under the session's
/// privacy policy, with tiered fallback and retry.
pub struct LlmRouter {
    local: Option<Arc<dyn CompletionBackend>>,
    cloud: Option<Arc<dyn CompletionBackend>>,
    catalog: ModelCatalog,
    retry: RetryConfig,
    timeouts: TimeoutConfig,
}

impl LlmRouter {
    pub fn new(
        local: Option<Arc<dyn CompletionBackend>>,
        cloud: Option<Arc<dyn CompletionBackend>>,
        catalog: ModelCatalog,
        retry: RetryConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            local,
            cloud,
            catalog,
            retry,
            timeouts,
        }
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn has_cloud(&self) -> bool {
        self.cloud.is_some()
    }

    /// Model selection decision tree: sensitive signals or local-only privacy
    /// pin the session to local tiers; high complexity with cloud permitted
    /// goes to the best remote model; everything else runs local-fast.
    pub fn select(
        &self,
        complexity: TaskComplexity,
        privacy: PrivacyMode,
        sensitive: bool,
    ) -> LogicalModel {
        if sensitive || privacy == PrivacyMode::LocalOnly {
            return match complexity {
                TaskComplexity::High => LogicalModel::LocalPowerful,
                TaskComplexity::Low => LogicalModel::LocalFast,
            };
        }
        if complexity == TaskComplexity::High && self.cloud.is_some() {
            return LogicalModel::CloudBest;
        }
        LogicalModel::LocalFast
    }

    /// Resolve a logical model to a backend and concrete model id, enforcing
    /// the privacy invariant before any call and falling back by tier when a
    /// backend is missing.
    fn resolve(
        &self,
        model: LogicalModel,
        privacy: PrivacyMode,
    ) -> Result<(Arc<dyn CompletionBackend>, String, LogicalModel), LlmError> {
        // Privacy check comes first: a forbidden selection must fail before
        // any fallback reasoning, and no remote call may be attempted.
        if privacy == PrivacyMode::LocalOnly && !model.is_local() {
            return Err(LlmError::Policy(format!(
                "model {} selected in local-only session",
                model.as_str()
            )));
        }

        // Fallback order is strictly downward in capability; local-only
        // sessions never reach the cloud arm.
        let chain: &[LogicalModel] = match model {
            LogicalModel::CloudBest => &[
                LogicalModel::CloudBest,
                LogicalModel::LocalPowerful,
                LogicalModel::LocalFast,
            ],
            LogicalModel::LocalPowerful => &[LogicalModel::LocalPowerful, LogicalModel::LocalFast],
            LogicalModel::LocalFast => &[LogicalModel::LocalFast],
        };

        for candidate in chain {
            let (backend, concrete) = match candidate {
                LogicalModel::CloudBest => (self.cloud.clone(), self.catalog.cloud_best.clone()),
                LogicalModel::LocalPowerful => {
                    (self.local.clone(), self.catalog.local_powerful.clone())
                }
                LogicalModel::LocalFast => (self.local.clone(), self.catalog.local_fast.clone()),
            };
            if let Some(backend) = backend {
                if *candidate != model {
                    tracing::info!(
                        requested = model.as_str(),
                        using = candidate.as_str(),
                        "Falling back to available model tier"
                    );
                }
                return Ok((backend, concrete, *candidate));
            }
        }

        Err(LlmError::Unavailable(model.as_str().to_string()))
    }

    /// Non-streaming completion with timeout and retry.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: LogicalModel,
        privacy: PrivacyMode,
        temperature: Option<f64>,
        max_tokens: u32,
    ) -> Result<Completion, LlmError> {
        let (backend, concrete, tier) = self.resolve(model, privacy)?;
        let timeout = self.timeout_for(tier);
        let request = CompletionRequest {
            model: concrete,
            messages,
            temperature,
            max_tokens,
        };

        let completion = retry_with_backoff(&self.retry, "llm.complete", || {
            let backend = Arc::clone(&backend);
            let request = request.clone();
            async move {
                tokio::time::timeout(timeout, async move { backend.complete(&request).await })
                    .await
                    .map_err(|_| LlmError::Timeout(format!("completion after {:?}", timeout)))?
            }
        })
        .await?;

        metrics::counter!("llm.tokens", "tier" => tier.as_str())
            .increment(completion.usage.total());
        Ok(completion)
    }

    /// Streaming completion. Retry covers stream establishment only; once
    /// chunks flow, an error terminates the stream.
    pub async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: LogicalModel,
        privacy: PrivacyMode,
        temperature: Option<f64>,
        max_tokens: u32,
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let (backend, concrete, tier) = self.resolve(model, privacy)?;
        let timeout = self.timeout_for(tier);
        let request = CompletionRequest {
            model: concrete,
            messages,
            temperature,
            max_tokens,
        };

        tokio::time::timeout(timeout, backend.complete_stream(&request))
            .await
            .map_err(|_| LlmError::Timeout(format!("stream start after {:?}", timeout)))?
    }

    fn timeout_for(&self, tier: LogicalModel) -> std::time::Duration {
        if tier.is_local() {
            std::time::Duration::from_secs(self.timeouts.llm_local_secs)
        } else {
            std::time::Duration::from_secs(self.timeouts.llm_remote_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubBackend {
        name: &'static str,
    }

    impl CompletionBackend for StubBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn complete<'a>(
            &'a self,
            request: &'a CompletionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
            let model = request.model.clone();
            Box::pin(async move {
                Ok(Completion {
                    text: format!("completed by {}", model),
                    usage: TokenUsage {
                        input_tokens: 10,
                        output_tokens: 5,
                    },
                })
            })
        }

        fn complete_stream<'a>(
            &'a self,
            _request: &'a CompletionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, LlmError>> + Send + 'a>>
        {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(4);
                tx.send("chunk".to_string()).await.ok();
                Ok(rx)
            })
        }
    }

    fn router(local: bool, cloud: bool) -> LlmRouter {
        LlmRouter::new(
            local.then(|| Arc::new(StubBackend { name: "ollama" }) as Arc<dyn CompletionBackend>),
            cloud.then(|| Arc::new(StubBackend { name: "anthropic" }) as Arc<dyn CompletionBackend>),
            ModelCatalog::default(),
            RetryConfig {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            TimeoutConfig::default(),
        )
    }

    #[test]
    fn test_local_only_rejects_cloud_model() {
        let router = router(true, true);
        let err = router
            .resolve(LogicalModel::CloudBest, PrivacyMode::LocalOnly)
            .unwrap_err();
        assert!(matches!(err, LlmError::Policy(_)));
    }

    #[test]
    fn test_select_sensitive_pins_local() {
        let router = router(true, true);
        let model = router.select(TaskComplexity::High, PrivacyMode::CloudAllowed, true);
        assert!(model.is_local());
    }

    #[test]
    fn test_select_high_complexity_goes_cloud() {
        let router = router(true, true);
        assert_eq!(
            router.select(TaskComplexity::High, PrivacyMode::CloudAllowed, false),
            LogicalModel::CloudBest
        );
    }

    #[test]
    fn test_cloud_falls_back_to_local_when_missing() {
        let router = router(true, false);
        let (_, concrete, tier) = router
            .resolve(LogicalModel::CloudBest, PrivacyMode::CloudAllowed)
            .unwrap();
        assert_eq!(tier, LogicalModel::LocalPowerful);
        assert_eq!(concrete, ModelCatalog::default().local_powerful);
    }

    #[test]
    fn test_no_backend_is_unavailable() {
        let router = router(false, false);
        let err = router
            .resolve(LogicalModel::LocalFast, PrivacyMode::LocalOnly)
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_complete_routes_to_concrete_model() {
        let router = router(true, true);
        let completion = router
            .complete(
                vec![ChatMessage::user("hi")],
                LogicalModel::CloudBest,
                PrivacyMode::CloudAllowed,
                None,
                256,
            )
            .await
            .unwrap();
        assert!(completion.text.contains("claude"));
    }
}
