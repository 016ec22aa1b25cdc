//! Shared error taxonomy for the indexing and search pipelines.

use thiserror::Error;

/// Crate-wide error type.
///
/// Variants split along the recovery boundary: [`Configuration`] is always
/// fatal for the current invocation, [`InvalidArgument`] is rejected before
/// any I/O, while [`Store`] and [`Embedding`] are transient and reported
/// per-record / per-chunk so the rest of a batch can complete.
///
/// [`Configuration`]: MemvaultError::Configuration
/// [`InvalidArgument`]: MemvaultError::InvalidArgument
/// [`Store`]: MemvaultError::Store
/// [`Embedding`]: MemvaultError::Embedding
#[derive(Debug, Error)]
pub enum MemvaultError {
    /// Model cannot load, dimensionality mismatch, or model-identity
    /// mismatch between the collection and the active provider.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied input rejected before touching the model or store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient store failure for a single operation.
    #[error("store error: {0}")]
    Store(String),

    /// Transient embedding failure for a single call.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Source document could not be read or is not usable.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemvaultError {
    /// Whether the error is fatal for the whole run, as opposed to a
    /// per-record condition the batch machinery may absorb.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MemvaultError::Configuration(_)
                | MemvaultError::InvalidArgument(_)
                | MemvaultError::InvalidDocument(_)
                | MemvaultError::Io(_)
        )
    }
}

impl From<reqwest::Error> for MemvaultError {
    fn from(err: reqwest::Error) -> Self {
        // An endpoint that cannot be reached at all is a setup problem, not
        // a per-chunk transient; reindex must abort before mutating the store.
        if err.is_connect() || err.is_builder() {
            MemvaultError::Configuration(format!("embedding endpoint unavailable: {err}"))
        } else {
            MemvaultError::Embedding(err.to_string())
        }
    }
}

impl From<tokio_rusqlite::Error> for MemvaultError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        MemvaultError::Store(err.to_string())
    }
}
