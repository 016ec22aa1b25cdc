//! Search entry point: semantic lookup against the indexed collection.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::FmtSubscriber;

use memvault::store::SqliteVectorStore;
use memvault::{
    EmbeddingProvider, MemvaultConfig, MemvaultError, OllamaEmbeddingProvider, Searcher,
};

#[derive(Parser, Debug)]
#[command(
    name = "memvault-search",
    about = "Semantic similarity search over the indexed knowledge file"
)]
struct SearchCli {
    /// Query text
    #[arg(value_name = "QUERY")]
    query: String,

    /// Number of results to return
    #[arg(short = 'k', long = "top-k")]
    top_k: Option<usize>,

    /// SQLite collection file
    #[arg(long, env = "MEMVAULT_DB")]
    db: Option<PathBuf>,
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
    let cli = SearchCli::parse();
    let mut config = MemvaultConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let embedder = Arc::new(OllamaEmbeddingProvider::new(
        &config.base_url,
        &config.model,
        config.dimensions,
    )?);
    let store = Arc::new(
        SqliteVectorStore::open(&config.db_path, embedder.id(), config.dimensions).await?,
    );
    let searcher = Searcher::new(embedder, store, config.default_k);

    let results = searcher.search(&cli.query, cli.top_k).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!("--- Result {} (score {:.4}) ---", rank + 1, result.score);
        println!("Source : {}", result.source);
        println!("Section: {}", result.provenance());
        println!("{}", snippet(&result.text, 200));
        println!();
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
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
