//! Semantic search over a game master's content, independent of how it is hosted.
//!
//! Text is split by [chunks], embedded by a caller-supplied provider ([index]),
//! and kept in a persisted multi-vector [store]. The store writes itself back to
//! a key-value slot ([persistence]) in the background.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod diagnostics;
mod flush;
pub mod index;
pub mod persistence;
pub mod similarity;
pub mod store;

pub use app_data::{app_data_dir, store_dir};
pub use chunks::{chunk, chunk_with, tokenize, ChunkError, Chunks, ChunkingOptions};
pub use config::{
    load_config, read_config, save_config, Config, ConfigError, LoadFailurePolicy, StoreOptions,
    StoreOptionsBuilder,
};
pub use diagnostics::{DiagnosticSink, TracingSink};
pub use index::{embed_query, index_text, EmbeddingProvider, IndexError};
pub use persistence::{
    FileStorage, KeyValueStorage, MemoryStorage, Migration, Migrations, PersistenceError,
    FORMAT_VERSION,
};
pub use similarity::Similarity;
pub use store::{
    EmbeddingDocument, Query, SearchHit, StoreError, StoreStats, ValidationReason, VectorStore,
};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "lorelens-core ready"
}
