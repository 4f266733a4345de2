//! Embedding provider boundary.
//!
//! The pipeline consumes fixed-dimension vectors; where they come from is
//! pluggable. `HttpEmbeddingProvider` talks to an Ollama-style HTTP endpoint
//! with bounded retries; `FallbackEmbedder` derives a deterministic
//! pseudo-random vector from a SHA-256 of the text, so offline runs and
//! tests never need network access. Vectors produced by the fallback are
//! flagged in the returned batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::core::errors::RagError;
use crate::vector_math::l2_norm;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed each text into a fixed-dimension vector.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// Client for an Ollama-style `/api/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let body = json!({ "model": self.model, "prompt": text });
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(resp) => {
                    let parsed: EmbeddingResponse = resp
                        .json()
                        .await
                        .map_err(|e| RagError::upstream("embedding", e))?;
                    if parsed.embedding.len() != self.dimension {
                        return Err(RagError::upstream(
                            "embedding",
                            format!(
                                "dimension mismatch: expected {}, got {}",
                                self.dimension,
                                parsed.embedding.len()
                            ),
                        ));
                    }
                    return Ok(parsed.embedding);
                }
                Err(err) if attempt < self.max_retries => {
                    let backoff = Duration::from_millis(200 * (1 << attempt));
                    tracing::warn!(
                        "Embedding request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.max_retries,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(RagError::upstream("embedding", err)),
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// Deterministic fallback
// ---------------------------------------------------------------------------

/// Generates a deterministic unit vector from a SHA-256 seed of the text.
///
/// The same text always maps to the same vector, so duplicate detection and
/// similarity ranking behave consistently even without a real model.
pub struct FallbackEmbedder {
    dimension: usize,
}

impl FallbackEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let seed: [u8; 32] = hasher.finalize().into();

        let mut rng = StdRng::from_seed(seed);
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0f32))
            .collect();

        let norm = l2_norm(&vector);
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// Service with fallback
// ---------------------------------------------------------------------------

/// A batch of vectors plus whether the fallback generated them.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub fallback: bool,
}

/// Wraps an optional real provider and falls back to the deterministic
/// generator when the provider is unavailable.
pub struct EmbeddingService {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    fallback: FallbackEmbedder,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = provider.dimension();
        Self {
            provider: Some(provider),
            fallback: FallbackEmbedder::new(dimension),
            dimension,
        }
    }

    /// Service with no real provider; every embedding comes from the
    /// deterministic fallback.
    pub fn offline(dimension: usize) -> Self {
        Self {
            provider: None,
            fallback: FallbackEmbedder::new(dimension),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, RagError> {
        if let Some(provider) = &self.provider {
            match provider.embed(texts).await {
                Ok(vectors) => {
                    return Ok(EmbeddingBatch {
                        vectors,
                        fallback: false,
                    })
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!("Embedding provider unavailable, using fallback: {}", err);
                }
                Err(err) => return Err(err),
            }
        }

        let vectors = texts.iter().map(|t| self.fallback.embed_text(t)).collect();
        Ok(EmbeddingBatch {
            vectors,
            fallback: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic() {
        let embedder = FallbackEmbedder::new(16);
        let a = embedder.embed_text("the sky is blue");
        let b = embedder.embed_text("the sky is blue");
        let c = embedder.embed_text("the ocean is deep");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fallback_vectors_are_normalized() {
        let embedder = FallbackEmbedder::new(32);
        let v = embedder.embed_text("normalize me");
        let norm = l2_norm(&v);
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn offline_service_flags_fallback() {
        let service = EmbeddingService::offline(8);
        let batch = service
            .embed(&["hello".to_string(), "world".to_string()])
            .await
            .unwrap();

        assert!(batch.fallback);
        assert_eq!(batch.vectors.len(), 2);
        assert_eq!(batch.vectors[0].len(), 8);
    }
}
