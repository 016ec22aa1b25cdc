//! Query-time orchestration: validate, embed, retrieve, format.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::store::VectorStore;
use crate::types::MemvaultError;

/// A display-ready ranked hit.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub header_path: Vec<String>,
    pub source: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f32,
}

impl SearchResult {
    /// Header path rendered for display (`A > B`), or the source name for
    /// preamble chunks with no headers.
    pub fn provenance(&self) -> String {
        if self.header_path.is_empty() {
            self.source.clone()
        } else {
            self.header_path.join(" > ")
        }
    }
}

/// Drives Embedder → VectorStore for a query string.
pub struct Searcher {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    default_k: usize,
}

impl Searcher {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        default_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            default_k: default_k.max(1),
        }
    }

    /// Returns up to `top_k` results ranked by descending similarity.
    ///
    /// Empty/whitespace queries and a zero result count are rejected before
    /// any I/O; an empty collection yields an empty result list, not an
    /// error. The store's recorded model identity must match the configured
    /// embedder, otherwise the search refuses to run.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, MemvaultError> {
        if query.trim().is_empty() {
            return Err(MemvaultError::InvalidArgument(
                "query text must not be empty".to_string(),
            ));
        }
        let k = top_k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(MemvaultError::InvalidArgument(
                "result count must be positive".to_string(),
            ));
        }
        if self.store.model_id() != self.embedder.id() {
            return Err(MemvaultError::Configuration(format!(
                "collection was indexed with model '{}' but provider '{}' is configured",
                self.store.model_id(),
                self.embedder.id()
            )));
        }

        let query_vector = self.embedder.embed(query).await?;
        let hits = self.store.query(&query_vector, k).await?;
        debug!(query_len = query.len(), k, hits = hits.len(), "search complete");

        Ok(hits
            .into_iter()
            .map(|(record, score)| SearchResult {
                text: record.content,
                header_path: record.metadata.header_path,
                source: record.metadata.source,
                score,
            })
            .collect())
    }
}
