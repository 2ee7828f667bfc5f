//! Embedding gateway abstraction and implementations.
//!
//! The pipeline consumes embeddings through the [`Embedder`] trait and
//! never knows which backend is behind it. Selection happens once, at
//! construction time, from configuration:
//!
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with
//!   retry and exponential backoff;
//! - **[`StubEmbedder`]** — deterministic, offline vectors derived from
//!   a hash of the text. The default when no provider is configured, so
//!   an unconfigured deployment degrades instead of crashing.
//!
//! Also provides the vector utilities shared by ingestion and
//! retrieval: [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//! and [`cosine_similarity`] for scoring.
//!
//! # Retry strategy (OpenAI)
//!
//! - HTTP 429 and 5xx → retry with backoff (1s, 2s, 4s, ... capped at 2^5)
//! - other 4xx → fail immediately
//! - network errors → retry

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// An external capability turning text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs and stats.
    fn model_name(&self) -> &str;
    /// Embedding dimensionality.
    fn dims(&self) -> usize;
    /// Embed one text. Called with a request-scoped timeout by the
    /// pipeline; implementations should not retry forever.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "stub" => Ok(Box::new(StubEmbedder::new(config.dims.unwrap_or(384)))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Stub embedder ============

/// Deterministic offline embedder.
///
/// Produces a unit-length vector seeded from a SHA-256 of the input, so
/// identical texts always embed identically and similarity search stays
/// meaningful in tests and unconfigured deployments.
pub struct StubEmbedder {
    dims: usize,
}

impl StubEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vec: Vec<f32> = (0..self.dims)
            .map(|i| {
                let byte = digest[i % digest.len()];
                // Mix the position in so dimensions differ beyond the
                // digest length.
                let mixed = byte.wrapping_mul(31).wrapping_add((i / digest.len()) as u8);
                (mixed as f32 / 127.5) - 1.0
            })
            .collect();

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        Ok(vec)
    }
}

// ============ OpenAI embedder ============

/// Embedding gateway backed by `POST /v1/embeddings`.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Zero for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0, 0.0, 0.0), |(d, na, nb), (x, y)| {
        (d + x * y, na + x * x, nb + y * y)
    });

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_embedder_is_deterministic() {
        let embedder = StubEmbedder::new(64);
        let a = embedder.embed("the same text").await.unwrap();
        let b = embedder.embed("the same text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = embedder.embed("different text").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn stub_vectors_are_normalized() {
        let embedder = StubEmbedder::new(384);
        let v = embedder.embed("some text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn stub_is_selected_when_unconfigured() {
        let config = EmbeddingConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "stub");
        assert_eq!(embedder.dims(), 384);
    }
}
