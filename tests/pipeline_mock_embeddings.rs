//! End-to-end pipeline tests with deterministic mock embeddings.
//!
//! Every run uses a throwaway SQLite collection, so the tests exercise the
//! real store (sqlite-vec) while keeping embeddings deterministic and
//! offline.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use memvault::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use memvault::store::{
    DeleteReport, Record, RecordMetadata, SqliteVectorStore, StoredEntry, UpsertReport,
    VectorStore,
};
use memvault::{Indexer, MemvaultError, Searcher};

const DIMS: usize = 8;

struct Fixture {
    _dir: TempDir,
    provider: Arc<MockEmbeddingProvider>,
    store: Arc<SqliteVectorStore>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new(DIMS));
        let store = Arc::new(
            SqliteVectorStore::open(dir.path().join("collection.sqlite3"), provider.id(), DIMS)
                .await
                .unwrap(),
        );
        Self {
            _dir: dir,
            provider,
            store,
        }
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(self.provider.clone(), self.store.clone(), "MEMORY.md", 4)
    }

    fn searcher(&self) -> Searcher {
        Searcher::new(self.provider.clone(), self.store.clone(), 3)
    }
}

/// Delegates to the real store but fails the configured ids, so tests can
/// exercise partial-failure accounting against real persisted state.
struct FaultyStore {
    inner: Arc<SqliteVectorStore>,
    fail_upsert_id: Option<String>,
    fail_delete_id: Option<String>,
}

#[async_trait]
impl VectorStore for FaultyStore {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn upsert(&self, records: Vec<Record>) -> Result<UpsertReport, MemvaultError> {
        let (rejected, accepted): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|record| Some(&record.id) == self.fail_upsert_id.as_ref());
        let mut report = self.inner.upsert(accepted).await?;
        for record in rejected {
            report
                .failures
                .push((record.id, "injected store failure".to_string()));
        }
        Ok(report)
    }

    async fn delete(&self, ids: &[String]) -> Result<DeleteReport, MemvaultError> {
        let (rejected, accepted): (Vec<String>, Vec<String>) = ids
            .iter()
            .cloned()
            .partition(|id| Some(id) == self.fail_delete_id.as_ref());
        let mut report = self.inner.delete(&accepted).await?;
        for id in rejected {
            report
                .failures
                .push((id, "injected store failure".to_string()));
        }
        Ok(report)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Record, f32)>, MemvaultError> {
        self.inner.query(vector, top_k).await
    }

    async fn list_entries(&self) -> Result<Vec<StoredEntry>, MemvaultError> {
        self.inner.list_entries().await
    }

    async fn count(&self) -> Result<usize, MemvaultError> {
        self.inner.count().await
    }
}

const SAMPLE_DOC: &str = "\
# Projects\nWorking on the vault indexer.\n\
## Search\nCosine similarity over chunk embeddings.\n\
# People\nAlice prefers async reviews.\n";

#[tokio::test]
async fn reindex_populates_collection() {
    let fx = Fixture::new().await;
    let report = fx.indexer().reindex(SAMPLE_DOC).await.unwrap();

    assert_eq!(report.added, 3);
    assert_eq!(report.updated, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(report.unchanged, 0);
    assert!(report.failed.is_empty());
    assert_eq!(fx.store.count().await.unwrap(), 3);

    let ids = fx.store.list_ids().await.unwrap();
    assert!(ids.contains("projects"));
    assert!(ids.contains("projects/search"));
    assert!(ids.contains("people"));
}

#[tokio::test]
async fn reindex_is_idempotent() {
    let fx = Fixture::new().await;
    let indexer = fx.indexer();
    indexer.reindex(SAMPLE_DOC).await.unwrap();

    let second = indexer.reindex(SAMPLE_DOC).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.unchanged, 3);
    assert_eq!(fx.store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn changed_section_is_updated_not_duplicated() {
    let fx = Fixture::new().await;
    let indexer = fx.indexer();
    indexer.reindex(SAMPLE_DOC).await.unwrap();

    let edited = SAMPLE_DOC.replace("async reviews", "morning reviews");
    let report = indexer.reindex(&edited).await.unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(fx.store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn removed_section_is_deleted() {
    let fx = Fixture::new().await;
    let indexer = fx.indexer();
    indexer.reindex(SAMPLE_DOC).await.unwrap();

    let shrunk = "# Projects\nWorking on the vault indexer.\n## Search\nCosine similarity over chunk embeddings.\n";
    let report = indexer.reindex(shrunk).await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.unchanged, 2);
    assert_eq!(fx.store.count().await.unwrap(), 2);
    assert!(!fx.store.list_ids().await.unwrap().contains("people"));
}

#[tokio::test]
async fn empty_document_clears_collection() {
    let fx = Fixture::new().await;
    let indexer = fx.indexer();
    indexer.reindex(SAMPLE_DOC).await.unwrap();

    let report = indexer.reindex("").await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 0);
    assert_eq!(report.removed, 3);
    assert_eq!(fx.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let fx = Fixture::new().await;
    fx.indexer().reindex(SAMPLE_DOC).await.unwrap();

    let results = fx
        .searcher()
        .search("Cosine similarity over chunk embeddings.", Some(3))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    // The query text matches one chunk exactly; the mock embedder maps
    // identical text to the identical vector, so it must rank first.
    assert_eq!(results[0].header_path, vec!["Projects", "Search"]);
    assert!(results[0].score > results[1].score - f32::EPSILON);
    assert!(results
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
}

#[tokio::test]
async fn repeated_queries_are_deterministic() {
    let fx = Fixture::new().await;
    fx.indexer().reindex(SAMPLE_DOC).await.unwrap();
    let searcher = fx.searcher();

    let first = searcher.search("vault indexer", Some(3)).await.unwrap();
    let second = searcher.search("vault indexer", Some(3)).await.unwrap();
    let first_ids: Vec<_> = first.iter().map(|r| r.provenance()).collect();
    let second_ids: Vec<_> = second.iter().map(|r| r.provenance()).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn search_on_empty_collection_is_empty_not_error() {
    let fx = Fixture::new().await;
    let results = fx.searcher().search("anything", Some(5)).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_query_is_invalid_argument() {
    let fx = Fixture::new().await;
    let err = fx.searcher().search("   ", Some(5)).await.unwrap_err();
    assert!(matches!(err, MemvaultError::InvalidArgument(_)));
}

#[tokio::test]
async fn zero_top_k_is_invalid_argument() {
    let fx = Fixture::new().await;
    let err = fx.searcher().search("query", Some(0)).await.unwrap_err();
    assert!(matches!(err, MemvaultError::InvalidArgument(_)));

    let vector = fx.provider.embed("query").await.unwrap();
    let err = fx.store.query(&vector, 0).await.unwrap_err();
    assert!(matches!(err, MemvaultError::InvalidArgument(_)));
}

#[tokio::test]
async fn wrong_length_vector_is_configuration_error() {
    let fx = Fixture::new().await;
    let record = Record {
        id: "bad".to_string(),
        content: "bad vector".to_string(),
        embedding: vec![0.0; DIMS + 1],
        metadata: RecordMetadata::default(),
    };
    let err = fx.store.upsert(vec![record]).await.unwrap_err();
    assert!(matches!(err, MemvaultError::Configuration(_)));
    assert_eq!(fx.store.count().await.unwrap(), 0);

    let err = fx.store.query(&vec![0.0; DIMS - 1], 3).await.unwrap_err();
    assert!(matches!(err, MemvaultError::Configuration(_)));
}

#[tokio::test]
async fn reopening_with_different_model_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.sqlite3");
    SqliteVectorStore::open(&path, "model-a", DIMS).await.unwrap();

    let err = SqliteVectorStore::open(&path, "model-b", DIMS)
        .await
        .unwrap_err();
    assert!(matches!(err, MemvaultError::Configuration(_)));

    let err = SqliteVectorStore::open(&path, "model-a", DIMS + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MemvaultError::Configuration(_)));
}

#[tokio::test]
async fn search_refuses_model_identity_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(dir.path().join("c.sqlite3"), "some-other-model", DIMS)
            .await
            .unwrap(),
    );
    let provider = Arc::new(MockEmbeddingProvider::new(DIMS));
    let searcher = Searcher::new(provider, store, 3);

    let err = searcher.search("query", None).await.unwrap_err();
    assert!(matches!(err, MemvaultError::Configuration(_)));
}

#[tokio::test]
async fn transient_embedding_failure_is_retried() {
    let fx = Fixture::new().await;
    // First call (the batch) fails; the per-chunk fallback succeeds.
    fx.provider.fail_next(1);
    let report = fx.indexer().reindex(SAMPLE_DOC).await.unwrap();
    assert_eq!(report.added, 3);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn persistently_failing_chunk_is_reported_not_fatal() {
    let fx = Fixture::new().await;
    let doc = "# Only\nsingle section body\n";
    // Batch attempt + per-chunk attempt + one retry all fail.
    fx.provider.fail_next(3);
    let report = fx.indexer().reindex(doc).await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "only");
    assert_eq!(fx.store.count().await.unwrap(), 0);

    // The next run recovers.
    let report = fx.indexer().reindex(doc).await.unwrap();
    assert_eq!(report.added, 1);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn tie_break_prefers_earliest_indexed() {
    let fx = Fixture::new().await;
    // Two records with identical embeddings: same text hash via the mock.
    let vector = fx.provider.embed("duplicate body").await.unwrap();
    let make = |id: &str| Record {
        id: id.to_string(),
        content: "duplicate body".to_string(),
        embedding: vector.clone(),
        metadata: RecordMetadata {
            header_path: vec![id.to_string()],
            source: "MEMORY.md".to_string(),
            content_hash: format!("hash-{id}"),
        },
    };
    fx.store.upsert(vec![make("first")]).await.unwrap();
    fx.store.upsert(vec![make("second")]).await.unwrap();

    let hits = fx.store.query(&vector, 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0.id, "first");
    assert_eq!(hits[1].0.id, "second");
}

#[tokio::test]
async fn collection_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.sqlite3");
    let provider = Arc::new(MockEmbeddingProvider::new(DIMS));

    {
        let store = Arc::new(
            SqliteVectorStore::open(&path, provider.id(), DIMS)
                .await
                .unwrap(),
        );
        let indexer = Indexer::new(provider.clone(), store, "MEMORY.md", 4);
        indexer.reindex(SAMPLE_DOC).await.unwrap();
    }

    let store = Arc::new(
        SqliteVectorStore::open(&path, provider.id(), DIMS)
            .await
            .unwrap(),
    );
    assert_eq!(store.count().await.unwrap(), 3);

    let searcher = Searcher::new(provider, store, 3);
    let results = searcher.search("vault indexer", None).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn failed_upsert_is_reported_and_others_commit() {
    let fx = Fixture::new().await;
    let store = Arc::new(FaultyStore {
        inner: fx.store.clone(),
        fail_upsert_id: Some("people".to_string()),
        fail_delete_id: None,
    });
    let indexer = Indexer::new(fx.provider.clone(), store, "MEMORY.md", 4);

    let report = indexer.reindex(SAMPLE_DOC).await.unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.updated, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "people");

    let ids = fx.store.list_ids().await.unwrap();
    assert_eq!(fx.store.count().await.unwrap(), 2);
    assert!(ids.contains("projects"));
    assert!(ids.contains("projects/search"));
    assert!(!ids.contains("people"));
}

#[tokio::test]
async fn failed_update_keeps_previous_record() {
    let fx = Fixture::new().await;
    fx.indexer().reindex(SAMPLE_DOC).await.unwrap();
    let hash_before = stored_hash(&fx.store, "people").await;

    let edited = SAMPLE_DOC.replace("async reviews", "morning reviews");
    let store = Arc::new(FaultyStore {
        inner: fx.store.clone(),
        fail_upsert_id: Some("people".to_string()),
        fail_delete_id: None,
    });
    let indexer = Indexer::new(fx.provider.clone(), store, "MEMORY.md", 4);

    let report = indexer.reindex(&edited).await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(fx.store.count().await.unwrap(), 3);
    assert_eq!(stored_hash(&fx.store, "people").await, hash_before);

    // A healthy run afterwards applies the update.
    let report = fx.indexer().reindex(&edited).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_ne!(stored_hash(&fx.store, "people").await, hash_before);
}

#[tokio::test]
async fn failed_delete_is_reported_and_upsert_still_runs() {
    let fx = Fixture::new().await;
    fx.indexer().reindex(SAMPLE_DOC).await.unwrap();

    // "People" disappears from the document, "Projects" changes body.
    let shrunk = "\
# Projects\nNow shipping the vault indexer.\n\
## Search\nCosine similarity over chunk embeddings.\n";
    let store = Arc::new(FaultyStore {
        inner: fx.store.clone(),
        fail_upsert_id: None,
        fail_delete_id: Some("people".to_string()),
    });
    let indexer = Indexer::new(fx.provider.clone(), store, "MEMORY.md", 4);

    let report = indexer.reindex(shrunk).await.unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "people");
    // The upsert phase still ran after the failed deletion.
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(fx.store.count().await.unwrap(), 3);

    // A healthy run afterwards removes the stale chunk.
    let report = fx.indexer().reindex(shrunk).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(fx.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn corrupted_metadata_surfaces_store_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("collection.sqlite3");
    let provider = Arc::new(MockEmbeddingProvider::new(DIMS));
    let store = Arc::new(
        SqliteVectorStore::open(&path, provider.id(), DIMS)
            .await
            .unwrap(),
    );
    let indexer = Indexer::new(provider.clone(), store.clone(), "MEMORY.md", 4);
    indexer.reindex(SAMPLE_DOC).await.unwrap();

    // Damage one row's stored metadata behind the store's back.
    let raw = tokio_rusqlite::Connection::open(&path).await.unwrap();
    raw.call(|conn| {
        conn.execute("UPDATE chunks SET header_path = 'not json' WHERE id = 'people'", [])
            .map(|_| ())
            .map_err(tokio_rusqlite::Error::Rusqlite)
    })
    .await
    .unwrap();

    let vector = provider.embed("anything").await.unwrap();
    let err = store.query(&vector, 3).await.unwrap_err();
    assert!(matches!(err, MemvaultError::Store(_)));
    assert!(err.to_string().contains("people"));
}

async fn stored_hash(store: &SqliteVectorStore, id: &str) -> String {
    store
        .list_entries()
        .await
        .unwrap()
        .into_iter()
        .find(|entry| entry.id == id)
        .map(|entry| entry.content_hash)
        .unwrap()
}
