//! SQLite-backed vector store using the `sqlite-vec` extension.
//!
//! Layout: a `chunks` table for text and metadata, a `chunk_embeddings` vec0
//! virtual table joined by rowid for the vectors, and a `collection_meta`
//! key/value table recording the embedding model identity and dimensionality
//! the collection was created with.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::{debug, warn};

use super::{DeleteReport, Record, RecordMetadata, StoredEntry, UpsertReport, VectorStore};
use crate::types::MemvaultError;

const META_MODEL_ID: &str = "model_id";
const META_DIMENSIONS: &str = "dimensions";

pub struct SqliteVectorStore {
    conn: Connection,
    model_id: String,
    dimensions: usize,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl SqliteVectorStore {
    /// Opens (creating if absent) the collection at `path`.
    ///
    /// The first open records `model_id` and `dimensions` in collection
    /// metadata; later opens refuse a disagreeing configuration with
    /// [`MemvaultError::Configuration`] rather than mixing embedding spaces.
    pub async fn open(
        path: impl AsRef<Path>,
        model_id: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, MemvaultError> {
        if dimensions == 0 {
            return Err(MemvaultError::Configuration(
                "embedding dimensionality must be positive".to_string(),
            ));
        }
        register_sqlite_vec()?;

        let conn = Connection::open(path)
            .await
            .map_err(|err| MemvaultError::Store(err.to_string()))?;

        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map(|_| ())
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| {
            MemvaultError::Configuration(format!("sqlite-vec extension unavailable: {err}"))
        })?;

        let model = model_id.into();
        let stored = {
            let model = model.clone();
            conn.call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "CREATE TABLE IF NOT EXISTS chunks (
                        id TEXT PRIMARY KEY,
                        seq INTEGER NOT NULL,
                        header_path TEXT NOT NULL,
                        source TEXT NOT NULL,
                        content_hash TEXT NOT NULL,
                        content TEXT NOT NULL
                    )",
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings
                         USING vec0(embedding float[{dimensions}])"
                    ),
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "CREATE TABLE IF NOT EXISTS collection_meta (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    )",
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let existing_model: Option<String> = tx
                    .query_row(
                        "SELECT value FROM collection_meta WHERE key = ?",
                        [META_MODEL_ID],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let existing_dims: Option<String> = tx
                    .query_row(
                        "SELECT value FROM collection_meta WHERE key = ?",
                        [META_DIMENSIONS],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                if existing_model.is_none() {
                    tx.execute(
                        "INSERT INTO collection_meta (key, value) VALUES (?, ?), (?, ?)",
                        (
                            META_MODEL_ID,
                            model.as_str(),
                            META_DIMENSIONS,
                            dimensions.to_string(),
                        ),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok((existing_model, existing_dims))
            })
            .await
            .map_err(|err| MemvaultError::Store(err.to_string()))?
        };

        if let Some(stored_model) = &stored.0 {
            if stored_model != &model {
                return Err(MemvaultError::Configuration(format!(
                    "collection was indexed with model '{stored_model}' but provider '{model}' is configured"
                )));
            }
        }
        if let Some(stored_dims) = stored.1 {
            if stored_dims != dimensions.to_string() {
                return Err(MemvaultError::Configuration(format!(
                    "collection stores {stored_dims}-dimensional vectors but provider emits {dimensions}"
                )));
            }
        }

        debug!(model = %model, dimensions, "opened vector collection");
        Ok(Self {
            conn,
            model_id: model,
            dimensions,
        })
    }

    fn check_dimensions(&self, vector: &[f32], context: &str) -> Result<(), MemvaultError> {
        if vector.len() != self.dimensions {
            return Err(MemvaultError::Configuration(format!(
                "{context}: vector has {} dimensions, collection expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn upsert(&self, records: Vec<Record>) -> Result<UpsertReport, MemvaultError> {
        // Dimensionality mismatches are configuration bugs, never a
        // per-record skip: reject the whole batch before writing.
        for record in &records {
            self.check_dimensions(&record.embedding, &format!("upsert '{}'", record.id))?;
        }

        let mut report = UpsertReport::default();
        for record in records {
            let id = record.id.clone();
            let result = self
                .conn
                .call(move |conn| {
                    let header_path = serde_json::to_string(&record.metadata.header_path)
                        .map_err(|err| {
                            tokio_rusqlite::Error::Other(Box::new(err))
                        })?;
                    let embedding = serde_json::to_string(&record.embedding)
                        .map_err(|err| tokio_rusqlite::Error::Other(Box::new(err)))?;

                    let tx = conn
                        .transaction()
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT rowid FROM chunks WHERE id = ?",
                            [record.id.as_str()],
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;

                    let rowid = match existing {
                        Some(rowid) => {
                            // Replacement keeps the original seq so tie-break
                            // order stays earliest-indexed-wins.
                            tx.execute(
                                "UPDATE chunks
                                 SET header_path = ?, source = ?, content_hash = ?, content = ?
                                 WHERE rowid = ?",
                                (
                                    header_path.as_str(),
                                    record.metadata.source.as_str(),
                                    record.metadata.content_hash.as_str(),
                                    record.content.as_str(),
                                    rowid,
                                ),
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                            tx.execute(
                                "DELETE FROM chunk_embeddings WHERE rowid = ?",
                                [rowid],
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                            rowid
                        }
                        None => {
                            tx.execute(
                                "INSERT INTO chunks (id, seq, header_path, source, content_hash, content)
                                 VALUES (?, (SELECT COALESCE(MAX(seq), -1) + 1 FROM chunks), ?, ?, ?, ?)",
                                (
                                    record.id.as_str(),
                                    header_path.as_str(),
                                    record.metadata.source.as_str(),
                                    record.metadata.content_hash.as_str(),
                                    record.content.as_str(),
                                ),
                            )
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                            tx.last_insert_rowid()
                        }
                    };

                    tx.execute(
                        "INSERT INTO chunk_embeddings (rowid, embedding) VALUES (?, ?)",
                        (rowid, embedding.as_str()),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(())
                })
                .await;

            match result {
                Ok(()) => report.committed += 1,
                Err(err) => {
                    warn!(id = %id, error = %err, "upsert failed for record");
                    report.failures.push((id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn delete(&self, ids: &[String]) -> Result<DeleteReport, MemvaultError> {
        // One transaction per id so a failing deletion cannot roll back or
        // block the others.
        let mut report = DeleteReport::default();
        for id in ids {
            let owned = id.clone();
            let result = self
                .conn
                .call(move |conn| {
                    let tx = conn
                        .transaction()
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let rowid: Option<i64> = tx
                        .query_row(
                            "SELECT rowid FROM chunks WHERE id = ?",
                            [owned.as_str()],
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let Some(rowid) = rowid else {
                        return Ok(false);
                    };
                    tx.execute("DELETE FROM chunk_embeddings WHERE rowid = ?", [rowid])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.execute("DELETE FROM chunks WHERE rowid = ?", [rowid])
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(true)
                })
                .await;

            match result {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(id = %id, error = %err, "delete failed for record");
                    report.failures.push((id.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Record, f32)>, MemvaultError> {
        if top_k == 0 {
            return Err(MemvaultError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }
        self.check_dimensions(vector, "query")?;

        let query_json = serde_json::to_string(vector)
            .map_err(|err| MemvaultError::Store(err.to_string()))?;

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT c.id, c.header_path, c.source, c.content_hash, c.content,
                                vec_to_json(e.embedding),
                                vec_distance_cosine(e.embedding, vec_f32(?)) AS distance
                         FROM chunks c
                         JOIN chunk_embeddings e ON e.rowid = c.rowid
                         ORDER BY distance ASC, c.seq ASC
                         LIMIT {top_k}"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let rows = stmt
                    .query_map([query_json.as_str()], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, f32>(6)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut results = Vec::new();
                for row in rows {
                    let (id, header_path_json, source, content_hash, content, embedding_json, distance) =
                        row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    // Malformed stored JSON means the collection is corrupt;
                    // surface it instead of returning empty fields.
                    let header_path = serde_json::from_str(&header_path_json).map_err(|err| {
                        tokio_rusqlite::Error::Other(
                            format!("corrupt header_path for '{id}': {err}").into(),
                        )
                    })?;
                    let embedding = serde_json::from_str(&embedding_json).map_err(|err| {
                        tokio_rusqlite::Error::Other(
                            format!("corrupt embedding for '{id}': {err}").into(),
                        )
                    })?;
                    let record = Record {
                        id,
                        content,
                        embedding,
                        metadata: RecordMetadata {
                            header_path,
                            source,
                            content_hash,
                        },
                    };
                    // Cosine similarity = 1 - cosine distance.
                    results.push((record, 1.0 - distance));
                }
                Ok(results)
            })
            .await
            .map_err(|err| MemvaultError::Store(err.to_string()))
    }

    async fn list_entries(&self) -> Result<Vec<StoredEntry>, MemvaultError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, content_hash FROM chunks ORDER BY seq ASC")
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(StoredEntry {
                            id: row.get(0)?,
                            content_hash: row.get(1)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(entries)
            })
            .await
            .map_err(|err| MemvaultError::Store(err.to_string()))
    }

    async fn count(&self) -> Result<usize, MemvaultError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| MemvaultError::Store(err.to_string()))
    }
}

fn register_sqlite_vec() -> Result<(), MemvaultError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!(
                    "failed to register sqlite-vec extension (code {rc})"
                ))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(MemvaultError::Configuration)
}
