use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::types::{ChatMessage, Completion, CompletionRequest, Role, TokenUsage};
use super::{CompletionBackend, LlmError};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// Split a request's messages into the system prompt and the turn list the
/// Anthropic API expects.
fn to_wire(messages: &[ChatMessage]) -> (String, Vec<AnthropicMessage>) {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let turns = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| AnthropicMessage {
            role: match m.role {
                Role::Assistant => "assistant",
                _ => "user",
            },
            content: m.content.clone(),
        })
        .collect();

    (system, turns)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Remote completion backend over the Anthropic Messages API. Only ever
/// constructed when `ANTHROPIC_API_KEY` is present; the router guarantees it
/// is never called for a local-only session.
#[derive(Debug)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let (system, messages) = to_wire(&request.messages);
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
            stream,
        };

        let response = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Auth(format!("{}: {}", status, body)));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(LlmError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api(format!("{}: {}", status, msg)));
        }

        Ok(response)
    }
}

impl CompletionBackend for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let response = self.send(request, false).await?;

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| LlmError::Parse(format!("Anthropic response: {}", e)))?;

            metrics::histogram!("llm.latency", "backend" => "anthropic")
                .record(start.elapsed().as_secs_f64());

            let text = parsed
                .content
                .iter()
                .filter_map(|block| match block {
                    AnthropicContentBlock::Text { text } => Some(text.as_str()),
                    AnthropicContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("");

            Ok(Completion {
                text,
                usage: TokenUsage {
                    input_tokens: parsed.usage.input_tokens,
                    output_tokens: parsed.usage.output_tokens,
                },
            })
        })
    }

    fn complete_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let mut response = self.send(request, true).await?;
            let (tx, rx) = mpsc::channel::<String>(32);

            // SSE: "data: {json}" lines; text arrives as content_block_delta.
            tokio::spawn(async move {
                let mut buffer = String::new();

                loop {
                    let chunk = match response.chunk().await {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Anthropic stream read failed");
                            break;
                        }
                    };

                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(newline) = buffer.find('\n') {
                        let line = buffer[..newline].trim().to_string();
                        buffer.drain(..=newline);

                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };

                        let event: AnthropicStreamEvent = match serde_json::from_str(data) {
                            Ok(e) => e,
                            Err(_) => continue,
                        };

                        match event.kind.as_str() {
                            "content_block_delta" => {
                                if let Some(text) = event.delta.and_then(|d| d.text) {
                                    if !text.is_empty() && tx.send(text).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            "message_stop" => return,
                            _ => {}
                        }
                    }
                }
            });

            Ok(rx)
        })
    }
}
