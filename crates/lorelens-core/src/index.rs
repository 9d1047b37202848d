//! Index pipeline: chunk → embed → store. The embedding backend is supplied by the caller.

use async_trait::async_trait;

use crate::chunks::{chunk_with, ChunkError, ChunkingOptions};
use crate::store::{EmbeddingDocument, StoreError, VectorStore};

/// Turns chunk texts into embedding vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}

/// Chunks `text`, embeds the chunks and stores them under `id`, replacing any
/// previous entry. Returns the number of chunks stored; empty text stores nothing.
pub async fn index_text<P>(
    store: &mut VectorStore,
    provider: &P,
    id: &str,
    text: &str,
    chunking: ChunkingOptions,
) -> Result<usize, IndexError>
where
    P: EmbeddingProvider + ?Sized,
{
    let vectors = embed_chunks(provider, text, chunking).await?;
    if vectors.is_empty() {
        return Ok(0);
    }
    let count = vectors.len();
    store.add(EmbeddingDocument::new(id, vectors))?;
    Ok(count)
}

/// Embeds the chunks of a search text, for use as a multi-vector query.
pub async fn embed_query<P>(
    provider: &P,
    text: &str,
    chunking: ChunkingOptions,
) -> Result<Vec<Vec<f32>>, IndexError>
where
    P: EmbeddingProvider + ?Sized,
{
    embed_chunks(provider, text, chunking).await
}

async fn embed_chunks<P>(
    provider: &P,
    text: &str,
    chunking: ChunkingOptions,
) -> Result<Vec<Vec<f32>>, IndexError>
where
    P: EmbeddingProvider + ?Sized,
{
    let chunks: Vec<String> = chunk_with(text, chunking)?.collect();
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = provider.embed_batch(&chunks).await?;
    if vectors.len() != chunks.len() {
        return Err(IndexError::EmbeddingCount {
            expected: chunks.len(),
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkError),
    #[error("embedding error: {0}")]
    Provider(String),
    #[error("provider returned {actual} embeddings for {expected} chunks")]
    EmbeddingCount { expected: usize, actual: usize },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
