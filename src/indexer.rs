//! Reindex orchestration: chunk → diff → embed → upsert/delete.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, chunk_markdown};
use crate::embeddings::EmbeddingProvider;
use crate::store::{Record, RecordMetadata, VectorStore};
use crate::types::MemvaultError;

/// A chunk that could not be embedded or persisted during a run.
#[derive(Clone, Debug, Serialize)]
pub struct ChunkFailure {
    pub id: String,
    pub reason: String,
}

/// Summary of a reindex run.
///
/// Running reindex twice on an unchanged document yields a second report
/// with zero added/updated/removed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: Vec<ChunkFailure>,
}

impl IndexReport {
    /// True when the run changed nothing and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0 && self.failed.is_empty()
    }
}

/// Drives Chunker → Embedder → VectorStore for one document.
///
/// The compare-then-write sequence is not atomic across the whole run;
/// concurrent reindex calls against the same collection must be serialized
/// by the caller (single-writer discipline or an external file lock).
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    source: String,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        source: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            source: source.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Rebuilds the collection incrementally from `document`.
    ///
    /// Chunks whose id and content hash are unchanged are skipped without
    /// re-embedding; new or changed chunks are embedded and upserted; ids no
    /// longer produced by the document are deleted. All embedding happens
    /// before any store mutation, so a fatally broken embedder leaves the
    /// collection untouched.
    pub async fn reindex(&self, document: &str) -> Result<IndexReport, MemvaultError> {
        let chunks = chunk_markdown(document);
        let stored: HashMap<String, String> = self
            .store
            .list_entries()
            .await?
            .into_iter()
            .map(|entry| (entry.id, entry.content_hash))
            .collect();

        let incoming_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let stale: Vec<String> = stored
            .keys()
            .filter(|id| !incoming_ids.contains(id.as_str()))
            .cloned()
            .collect();

        let mut report = IndexReport::default();
        let mut pending: Vec<(Chunk, String, bool)> = Vec::new();
        for chunk in chunks {
            let hash = content_hash(&chunk.text);
            match stored.get(&chunk.id) {
                Some(existing) if *existing == hash => report.unchanged += 1,
                Some(_) => pending.push((chunk, hash, true)),
                None => pending.push((chunk, hash, false)),
            }
        }

        debug!(
            pending = pending.len(),
            unchanged = report.unchanged,
            stale = stale.len(),
            "reindex diff computed"
        );

        let embedded = self.embed_pending(pending, &mut report).await?;

        // Mutations only start once embedding is done. A failed deletion is
        // transient per id: it is reported and the run carries on to upsert.
        let deleted = self.store.delete(&stale).await?;
        report.removed = deleted.removed;
        for (id, reason) in deleted.failures {
            warn!(id = %id, reason = %reason, "stale chunk could not be deleted");
            report.failed.push(ChunkFailure { id, reason });
        }

        if !embedded.is_empty() {
            let mut adds: HashSet<String> = HashSet::new();
            let mut records = Vec::with_capacity(embedded.len());
            for (chunk, hash, is_update, embedding) in embedded {
                if !is_update {
                    adds.insert(chunk.id.clone());
                }
                records.push(Record {
                    id: chunk.id,
                    content: chunk.text,
                    embedding,
                    metadata: RecordMetadata {
                        header_path: chunk.header_path,
                        source: self.source.clone(),
                        content_hash: hash,
                    },
                });
            }

            let upsert = self.store.upsert(records).await?;
            for (id, reason) in upsert.failures {
                adds.remove(&id);
                report.failed.push(ChunkFailure { id, reason });
            }
            report.added = adds.len();
            report.updated = upsert.committed - report.added;
        }

        info!(
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "reindex complete"
        );
        Ok(report)
    }

    /// Embeds new/changed chunks. Batches for throughput; a failed batch
    /// degrades to per-chunk calls with one retry each, so a single bad
    /// chunk never aborts the run. Fatal embedder errors propagate.
    async fn embed_pending(
        &self,
        pending: Vec<(Chunk, String, bool)>,
        report: &mut IndexReport,
    ) -> Result<Vec<(Chunk, String, bool, Vec<f32>)>, MemvaultError> {
        let mut embedded = Vec::with_capacity(pending.len());
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(c, _, _)| c.text.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for ((chunk, hash, is_update), vector) in
                        batch.iter().cloned().zip(vectors)
                    {
                        embedded.push((chunk, hash, is_update, vector));
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "batch embedding failed, retrying per chunk");
                    for (chunk, hash, is_update) in batch.iter().cloned() {
                        match self.embed_with_retry(&chunk.text).await {
                            Ok(vector) => embedded.push((chunk, hash, is_update, vector)),
                            Err(err) if err.is_fatal() => return Err(err),
                            Err(err) => report.failed.push(ChunkFailure {
                                id: chunk.id,
                                reason: err.to_string(),
                            }),
                        }
                    }
                }
            }
        }
        Ok(embedded)
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, MemvaultError> {
        match self.embedder.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(err) if err.is_fatal() => Err(err),
            Err(first) => {
                debug!(error = %first, "embedding failed, retrying once");
                self.embedder.embed(text).await
            }
        }
    }
}

/// Hex sha-256 of the chunk text; the skip-unchanged key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
