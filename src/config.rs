//! Process configuration: defaults first, environment overrides on top.

use std::env;
use std::path::PathBuf;

use crate::types::MemvaultError;

pub const DEFAULT_DOCUMENT: &str = "MEMORY.md";
pub const DEFAULT_DB_PATH: &str = "memvault.sqlite3";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "all-minilm";
pub const DEFAULT_DIMENSIONS: usize = 384;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_TOP_K: usize = 3;

/// Runtime configuration shared by the index and search entry points.
#[derive(Clone, Debug)]
pub struct MemvaultConfig {
    /// Markdown source document.
    pub document: PathBuf,
    /// SQLite collection file.
    pub db_path: PathBuf,
    /// Base URL of the embedding endpoint.
    pub base_url: String,
    /// Embedding model name; doubles as the collection identity tag.
    pub model: String,
    /// Embedding dimensionality the model emits.
    pub dimensions: usize,
    /// Upper bound on texts per embedding request.
    pub batch_size: usize,
    /// Default result count for search.
    pub default_k: usize,
}

impl Default for MemvaultConfig {
    fn default() -> Self {
        Self {
            document: PathBuf::from(DEFAULT_DOCUMENT),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            default_k: DEFAULT_TOP_K,
        }
    }
}

impl MemvaultConfig {
    /// Loads configuration from the environment (and a `.env` file when
    /// present), falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, MemvaultError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        if let Ok(document) = env::var("MEMVAULT_DOCUMENT") {
            config.document = PathBuf::from(document);
        }
        if let Ok(db_path) = env::var("MEMVAULT_DB") {
            config.db_path = PathBuf::from(db_path);
        }
        if let Ok(base_url) = env::var("MEMVAULT_EMBED_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = env::var("MEMVAULT_MODEL") {
            config.model = model;
        }
        if let Ok(dimensions) = env::var("MEMVAULT_DIMENSIONS") {
            config.dimensions = parse_positive("MEMVAULT_DIMENSIONS", &dimensions)?;
        }
        if let Ok(batch_size) = env::var("MEMVAULT_BATCH_SIZE") {
            config.batch_size = parse_positive("MEMVAULT_BATCH_SIZE", &batch_size)?;
        }
        if let Ok(top_k) = env::var("MEMVAULT_TOP_K") {
            config.default_k = parse_positive("MEMVAULT_TOP_K", &top_k)?;
        }
        Ok(config)
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize, MemvaultError> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(MemvaultError::Configuration(format!(
            "{name} must be a positive integer, got '{value}'"
        ))),
    }
}
