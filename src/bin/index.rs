//! Indexing entry point: (re)build the collection from the knowledge file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::fs;
use tracing_subscriber::FmtSubscriber;

use memvault::store::SqliteVectorStore;
use memvault::{
    EmbeddingProvider, Indexer, MemvaultConfig, MemvaultError, OllamaEmbeddingProvider,
};

#[derive(Parser, Debug)]
#[command(
    name = "memvault-index",
    about = "Index a markdown knowledge file into the local vector collection"
)]
struct IndexCli {
    /// Markdown document to index (defaults to the configured MEMORY.md)
    #[arg(value_name = "DOCUMENT")]
    document: Option<PathBuf>,

    /// SQLite collection file
    #[arg(long, env = "MEMVAULT_DB")]
    db: Option<PathBuf>,

    /// Embedding batch size
    #[arg(long, env = "MEMVAULT_BATCH_SIZE")]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MemvaultError> {
    let cli = IndexCli::parse();
    let mut config = MemvaultConfig::from_env()?;
    if let Some(document) = cli.document {
        config.document = document;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size.max(1);
    }

    let document = fs::read_to_string(&config.document).await.map_err(|err| {
        MemvaultError::InvalidDocument(format!(
            "cannot read {}: {err}",
            config.document.display()
        ))
    })?;

    let embedder = Arc::new(OllamaEmbeddingProvider::new(
        &config.base_url,
        &config.model,
        config.dimensions,
    )?);
    let store = Arc::new(
        SqliteVectorStore::open(&config.db_path, embedder.id(), config.dimensions).await?,
    );

    let source = config
        .document
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.document.display().to_string());
    let indexer = Indexer::new(embedder, store, source, config.batch_size);

    let report = indexer.reindex(&document).await?;

    println!("Indexed {}", config.document.display());
    println!("  added     : {}", report.added);
    println!("  updated   : {}", report.updated);
    println!("  removed   : {}", report.removed);
    println!("  unchanged : {}", report.unchanged);
    if !report.failed.is_empty() {
        println!("  failed    : {}", report.failed.len());
        for failure in &report.failed {
            eprintln!("    {}: {}", failure.id, failure.reason);
        }
    }
    if report.is_noop() {
        println!("No changes.");
    }
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
            )
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
