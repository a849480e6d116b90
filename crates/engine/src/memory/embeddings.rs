use serde::{Deserialize, Serialize};

use deepresearch_common::config::RetryConfig;

use crate::retry::{retry_with_backoff, RetryClass, Retryable};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding HTTP error: {0}")]
    Http(String),

    #[error("Embedding API error: {0}")]
    Api(String),

    #[error("Embedding response parse error: {0}")]
    Parse(String),
}

impl Retryable for EmbeddingError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(_) | Self::Api(_) => RetryClass::Retryable,
            Self::Parse(_) => RetryClass::Fatal,
        }
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Client for computing text embeddings against the local Ollama embeddings
/// API. Local-only by construction, so vector storage never violates the
/// session privacy mode. Absent Ollama, the vector path degrades — chunks are
/// stored embedding-pending and similarity search returns nothing.
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    retry: RetryConfig,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str, retry: RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry,
        }
    }

    /// Embed a single text string, with retry.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embedding = retry_with_backoff(&self.retry, "embedding", || self.call_api(text)).await?;

        if embedding.is_empty() {
            return Err(EmbeddingError::Api("empty embedding returned".into()));
        }
        Ok(embedding)
    }

    async fn call_api(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .http
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Api(format!(
                "embeddings endpoint returned {}",
                response.status()
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_wire_shape() {
        let request = OllamaEmbedRequest {
            model: "nomic-embed-text",
            prompt: "wheat yields",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "nomic-embed-text");
        assert_eq!(json["prompt"], "wheat yields");
    }

    #[test]
    fn test_parse_embed_response() {
        let parsed: OllamaEmbedResponse =
            serde_json::from_str(r#"{"embedding": [0.1, -0.2, 0.3]}"#).unwrap();
        assert_eq!(parsed.embedding.len(), 3);
    }
}
