use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::embeddings::EmbeddingClient;

/// Chunking targets roughly 512 tokens with 64 tokens of overlap, using the
/// ~4 chars/token estimate.
const CHUNK_CHARS: usize = 2_048;
const OVERLAP_CHARS: usize = 256;

/// One embedded document chunk in the vector index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocChunk {
    pub url: String,
    pub title: String,
    pub chunk_index: usize,
    pub text: String,
    /// None when the embedder was unavailable at store time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// In-process vector store: JSON-lines file on disk, full index in memory,
/// cosine search. Comfortably under the latency target for the ≤10k document
/// scale this serves.
pub struct VectorStore {
    /// Index file path; None keeps the store memory-only (tests).
    path: Option<PathBuf>,
    entries: RwLock<Vec<DocChunk>>,
    embedder: Option<Arc<EmbeddingClient>>,
}

impl VectorStore {
    /// Open the index file under `dir`, loading existing entries.
    pub fn open(dir: &std::path::Path, embedder: Option<Arc<EmbeddingClient>>) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("index.jsonl");

        let mut entries = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DocChunk>(line) {
                    Ok(chunk) => entries.push(chunk),
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed index line"),
                }
            }
        }

        tracing::info!(chunks = entries.len(), path = %path.display(), "Vector index loaded");

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            embedder,
        })
    }

    /// Memory-only store for tests.
    pub fn in_memory(embedder: Option<Arc<EmbeddingClient>>) -> Self {
        Self {
            path: None,
            entries: RwLock::new(Vec::new()),
            embedder,
        }
    }

    /// Chunk, embed and store a document.
    pub async fn store_document(&self, url: &str, title: &str, text: &str) {
        let chunks = chunk_text(text);
        let mut stored = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.into_iter().enumerate() {
            let embedding = match &self.embedder {
                Some(embedder) => match embedder.embed(&chunk).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Embedding failed, storing pending");
                        None
                    }
                },
                None => None,
            };

            stored.push(DocChunk {
                url: url.to_string(),
                title: title.to_string(),
                chunk_index: index,
                text: chunk,
                embedding,
            });
        }

        if let Some(path) = &self.path {
            let mut lines = String::new();
            for chunk in &stored {
                if let Ok(line) = serde_json::to_string(chunk) {
                    lines.push_str(&line);
                    lines.push('\n');
                }
            }
            if let Err(e) = append_to_file(path, &lines) {
                tracing::warn!(error = %e, "Failed to persist vector index lines");
            }
        }

        let mut entries = self.entries.write().await;
        entries.extend(stored);
        metrics::gauge!("memory.vector.chunks").set(entries.len() as f64);
    }

    /// Top-k chunks by cosine similarity to the query. Empty without an
    /// embedder (nothing to compare against).
    pub async fn search_similar(&self, query: &str, k: usize) -> Vec<(DocChunk, f32)> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        let query_vec = match embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed");
                return Vec::new();
            }
        };

        let entries = self.entries.read().await;
        let mut scored: Vec<(DocChunk, f32)> = entries
            .iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                Some((chunk.clone(), cosine_similarity(embedding, &query_vec)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn append_to_file(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(content.as_bytes())
}

/// Split text into overlapping character windows.
pub fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= CHUNK_CHARS {
        return vec![text.to_string()];
    }

    let step = CHUNK_CHARS - OVERLAP_CHARS;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + CHUNK_CHARS).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
