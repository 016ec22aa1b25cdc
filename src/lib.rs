//! ```text
//! MEMORY.md ──► chunker::chunk_markdown ──► ordered, id-stable chunks
//!                                │
//!                                ▼
//!            indexer::Indexer ── diff against stored hashes
//!                │                        │
//!                ├─► embeddings (batched, per-chunk retry)
//!                └─► store::SqliteVectorStore (upsert / delete stale)
//!
//! query string ──► searcher::Searcher ──► embeddings ──► store.query
//!                                └─► ranked SearchResults (score + provenance)
//! ```
//!
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod indexer;
pub mod searcher;
pub mod store;
pub mod types;

pub use chunker::{Chunk, chunk_markdown};
pub use config::MemvaultConfig;
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, OllamaEmbeddingProvider};
pub use indexer::{IndexReport, Indexer};
pub use searcher::{SearchResult, Searcher};
pub use store::{DeleteReport, Record, RecordMetadata, UpsertReport, VectorStore};
pub use types::MemvaultError;
