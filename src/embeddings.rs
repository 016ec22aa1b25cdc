//! Embedding providers for chunk and query text.
//!
//! One provider instance serves both indexing and search; the collection
//! records the provider's identity tag so a silent model swap is refused
//! instead of quietly degrading retrieval quality.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::MemvaultError;

/// Maps text to fixed-dimension dense vectors.
///
/// `embed_batch` preserves input order 1:1. Transient failures surface as
/// [`MemvaultError::Embedding`] and may be retried per text; a provider that
/// cannot be reached at all, or that returns vectors of the wrong length,
/// surfaces [`MemvaultError::Configuration`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identity tag recorded in collection metadata (e.g. model name).
    fn id(&self) -> &str;

    /// Fixed output dimensionality of this provider.
    fn dimensions(&self) -> usize;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemvaultError>;

    /// Embeds a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemvaultError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Provider backed by an Ollama-compatible `/api/embed` endpoint.
#[derive(Clone, Debug)]
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, MemvaultError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("memvault/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|err| {
                MemvaultError::Configuration(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemvaultError> {
        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?
            .error_for_status()?;
        let body: EmbedResponse = response.json().await?;

        if body.embeddings.len() != texts.len() {
            return Err(MemvaultError::Embedding(format!(
                "model returned {} embeddings for {} inputs",
                body.embeddings.len(),
                texts.len()
            )));
        }
        for vector in &body.embeddings {
            if vector.len() != self.dimensions {
                return Err(MemvaultError::Configuration(format!(
                    "model '{}' returned {}-dimensional vectors, expected {}",
                    self.model,
                    vector.len(),
                    self.dimensions
                )));
            }
        }
        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemvaultError> {
        let texts = [text.to_string()];
        let mut vectors = self.request(&texts).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemvaultError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Deterministic hash-derived embeddings for tests and offline runs.
///
/// Identical text always maps to the identical vector, so ranking is
/// reproducible without a model. `fail_next` injects transient failures to
/// exercise the per-chunk retry path.
pub struct MockEmbeddingProvider {
    dimensions: usize,
    failures_remaining: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` embed calls fail with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64) << 17);
                (bits as f32) / (u64::MAX as f32) - 0.5
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn id(&self) -> &str {
        "mock-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemvaultError> {
        if self.take_failure() {
            return Err(MemvaultError::Embedding(
                "injected transient failure".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new(16);
        let texts = vec!["hello".to_string(), "world".to_string(), "hello".to_string()];
        let first = provider.embed_batch(&texts).await.unwrap();
        let second = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[tokio::test]
    async fn mock_vectors_have_requested_dimensions() {
        let provider = MockEmbeddingProvider::new(384);
        let vector = provider.embed("dimension check").await.unwrap();
        assert_eq!(vector.len(), 384);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let provider = MockEmbeddingProvider::new(8);
        provider.fail_next(1);
        let err = provider.embed("first").await.unwrap_err();
        assert!(matches!(err, MemvaultError::Embedding(_)));
        assert!(provider.embed("first").await.is_ok());
    }
}
