//! Vector store abstraction and record types.
//!
//! The store's internal indexing/ANN machinery is opaque behind the
//! [`VectorStore`] trait, so Indexer and Searcher logic stay independent of
//! the concrete storage technology.

pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::MemvaultError;

pub use sqlite::SqliteVectorStore;

/// Provenance and versioning data persisted alongside each record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Ancestor header titles, outermost first.
    pub header_path: Vec<String>,
    /// Source document name the chunk came from.
    pub source: String,
    /// Hex sha-256 of the chunk text, used for skip-unchanged diffing.
    pub content_hash: String,
}

/// The persisted unit: id, chunk text, embedding, metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Lightweight view of a stored record, enough for the reindex diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: String,
    pub content_hash: String,
}

/// Outcome of a batch upsert. Successful records commit even when others in
/// the same batch fail; failures are reported individually.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub committed: usize,
    pub failures: Vec<(String, String)>,
}

impl UpsertReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a batch delete. A failing id never aborts the rest of the
/// batch; ids absent from the collection are skipped silently.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub removed: usize,
    pub failures: Vec<(String, String)>,
}

/// Async interface over the persisted collection of records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Model identity tag recorded when the collection was created.
    fn model_id(&self) -> &str;

    /// Inserts or replaces records by id. Per-record commit: a failing record
    /// never rolls back previously committed ones.
    async fn upsert(&self, records: Vec<Record>) -> Result<UpsertReport, MemvaultError>;

    /// Removes records by id. Deleting a nonexistent id is a no-op, and a
    /// transient failure on one id is reported in the result instead of
    /// aborting the remaining deletions.
    async fn delete(&self, ids: &[String]) -> Result<DeleteReport, MemvaultError>;

    /// Returns at most `top_k` records ordered by descending cosine
    /// similarity, ties broken by earliest insertion. `top_k == 0` is an
    /// invalid argument.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Record, f32)>, MemvaultError>;

    /// Lists stored (id, content hash) pairs for incremental reindexing.
    async fn list_entries(&self) -> Result<Vec<StoredEntry>, MemvaultError>;

    /// Set of ids currently present in the collection.
    async fn list_ids(&self) -> Result<HashSet<String>, MemvaultError> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }

    /// Total number of stored records.
    async fn count(&self) -> Result<usize, MemvaultError>;
}
