//! CLI entry point for the lorelens vector store (for dev and maintenance).

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use lorelens_core::{
    app_data_dir, chunk_with, load_config, status, store_dir, Config, EmbeddingDocument,
    FileStorage, Query, TracingSink, VectorStore,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lorelens")]
#[command(about = "lorelens: semantic search store for game master content")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where lorelens stores its config and vector store.
    DataDir,
    /// Split a text file into chunks and print them.
    Chunk {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Window width in tokens (defaults to config).
        #[arg(long)]
        size: Option<usize>,
        /// Tokens shared by consecutive windows (defaults to config).
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Add or replace a document. Vectors are a JSON array of arrays.
    Add {
        id: String,
        #[arg(value_name = "VECTORS_JSON")]
        vectors: String,
    },
    /// Add every document from a JSON file of `[{"id": ..., "vectors": [[...]]}]`.
    Import {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Rank documents against a JSON vector or array of vectors.
    Search {
        #[arg(value_name = "QUERY_JSON")]
        query: String,
        /// Number of results (defaults to config).
        #[arg(long)]
        lookups: Option<usize>,
    },
    /// Remove a document.
    Delete { id: String },
    /// Remove every document.
    Clear,
    /// Print document, chunk and storage counts.
    Stats,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryInput {
    Single(Vec<f32>),
    Multi(Vec<Vec<f32>>),
}

impl QueryInput {
    fn as_query(&self) -> Query<'_> {
        match self {
            QueryInput::Single(v) => Query::Single(v),
            QueryInput::Multi(vs) => Query::Multi(vs),
        }
    }
}

fn open_store(config: &Config) -> Result<VectorStore, Box<dyn Error>> {
    let dir = store_dir().ok_or("could not determine app data directory")?;
    let store = VectorStore::open(
        config.store.clone(),
        Arc::new(FileStorage::new(dir)),
        Arc::new(TracingSink),
    )?;
    Ok(store)
}

async fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    let mut config = load_config();
    match command {
        Commands::Status => {
            println!("lorelens backend");
            println!("  core: {}", status());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Chunk {
            path,
            size,
            overlap,
        } => {
            let text = std::fs::read_to_string(&path)?;
            let mut options = config.chunking;
            options.chunk_size = size.unwrap_or(options.chunk_size);
            options.chunk_overlap = overlap.unwrap_or(options.chunk_overlap);
            for (i, chunk) in chunk_with(&text, options)?.enumerate() {
                println!("--- chunk {i} ({} chars)", chunk.chars().count());
                println!("{chunk}");
            }
        }
        Commands::Add { id, vectors } => {
            let vectors: Vec<Vec<f32>> = serde_json::from_str(&vectors)?;
            let mut store = open_store(&config)?;
            store.add(EmbeddingDocument::new(id, vectors))?;
            store.flush().await;
            println!("{} document(s)", store.size());
        }
        Commands::Import { path } => {
            let raw = std::fs::read_to_string(&path)?;
            let documents: Vec<EmbeddingDocument> = serde_json::from_str(&raw)?;
            let count = documents.len();
            let mut store = open_store(&config)?;
            store.add_batch(documents)?;
            store.flush().await;
            println!("imported {count} document(s); {} total", store.size());
        }
        Commands::Search { query, lookups } => {
            let query: QueryInput = serde_json::from_str(&query)?;
            if let Some(n) = lookups {
                config.store.lookups = n;
            }
            let store = open_store(&config)?;
            let hits = store.find_similar(query.as_query())?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Delete { id } => {
            let mut store = open_store(&config)?;
            let removed = store.delete(&id);
            store.flush().await;
            if removed {
                println!("deleted {id}");
            } else {
                println!("no document {id}");
            }
        }
        Commands::Clear => {
            let mut store = open_store(&config)?;
            store.clear();
            store.flush().await;
            println!("cleared");
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Commands::Status)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
