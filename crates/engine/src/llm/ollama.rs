use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};

use super::types::{ChatMessage, Completion, CompletionRequest, Role, TokenUsage};
use super::{CompletionBackend, LlmError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Deserialize)]
struct OllamaTag {
    name: String,
}

fn to_wire(msg: &ChatMessage) -> OllamaMessage {
    OllamaMessage {
        role: match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: msg.content.clone(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Local inference backend over the Ollama HTTP API. Request parallelism is
/// capped by a semaphore sized to `OLLAMA_NUM_PARALLEL`; a streaming request
/// holds its slot for the lifetime of the stream.
#[derive(Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    parallel: Arc<Semaphore>,
}

impl OllamaClient {
    pub fn new(base_url: &str, num_parallel: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            parallel: Arc::new(Semaphore::new(num_parallel.max(1) as usize)),
        }
    }

    /// List installed models. Used by the startup probe.
    pub async fn probe(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Api(format!(
                "Ollama probe returned {}",
                response.status()
            )));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn send_chat(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &request.model,
            messages: request.messages.iter().map(to_wire).collect(),
            stream,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Ollama returned {}: {}", status, body)));
        }

        Ok(response)
    }
}

impl CompletionBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let _permit = self
                .parallel
                .acquire()
                .await
                .map_err(|_| LlmError::Unavailable("ollama semaphore closed".into()))?;

            let start = std::time::Instant::now();
            let response = self.send_chat(request, false).await?;

            let parsed: OllamaChatResponse = response
                .json()
                .await
                .map_err(|e| LlmError::Parse(format!("Ollama response: {}", e)))?;

            metrics::histogram!("llm.latency", "backend" => "ollama")
                .record(start.elapsed().as_secs_f64());

            Ok(Completion {
                text: parsed.message.content,
                usage: TokenUsage {
                    input_tokens: parsed.prompt_eval_count,
                    output_tokens: parsed.eval_count,
                },
            })
        })
    }

    fn complete_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let permit = Arc::clone(&self.parallel)
                .acquire_owned()
                .await
                .map_err(|_| LlmError::Unavailable("ollama semaphore closed".into()))?;

            let mut response = self.send_chat(request, true).await?;
            let (tx, rx) = mpsc::channel::<String>(32);

            // NDJSON: one JSON object per line, final object has done=true.
            tokio::spawn(async move {
                let _permit = permit;
                let mut buffer = String::new();

                loop {
                    let chunk = match response.chunk().await {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Ollama stream read failed");
                            break;
                        }
                    };

                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(newline) = buffer.find('\n') {
                        let line = buffer[..newline].trim().to_string();
                        buffer.drain(..=newline);
                        if line.is_empty() {
                            continue;
                        }

                        let parsed: OllamaStreamChunk = match serde_json::from_str(&line) {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping malformed stream line");
                                continue;
                            }
                        };

                        if let Some(message) = parsed.message {
                            if !message.content.is_empty()
                                && tx.send(message.content).await.is_err()
                            {
                                // Consumer cancelled at a chunk boundary.
                                return;
                            }
                        }
                        if parsed.done {
                            return;
                        }
                    }
                }
            });

            Ok(rx)
        })
    }
}
