//! Persisted vector store: document id → one embedding per chunk, searched by
//! blended multi-chunk similarity.
//!
//! Mutations are applied in memory at once and handed to a background writer
//! (see [`crate::flush`]); call [`VectorStore::flush`] to wait for durability.
//! The store is meant for one logical owner: mutations take `&mut self`.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, LoadFailurePolicy, StoreOptions};
use crate::diagnostics::DiagnosticSink;
use crate::flush::Flusher;
use crate::persistence::{decode, storage_key, Entries, KeyValueStorage, PersistenceError, FORMAT_VERSION};
use crate::similarity::blend;

/// A document id with one embedding per content chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDocument {
    pub id: String,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingDocument {
    pub fn new(id: impl Into<String>, vectors: Vec<Vec<f32>>) -> Self {
        Self {
            id: id.into(),
            vectors,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

/// Search input: one query vector, or several whose scores are averaged.
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    Single(&'a [f32]),
    Multi(&'a [Vec<f32>]),
}

impl<'a> Query<'a> {
    fn vectors(&self) -> Vec<&'a [f32]> {
        match *self {
            Query::Single(v) => vec![v],
            Query::Multi(vs) => vs.iter().map(Vec::as_slice).collect(),
        }
    }
}

impl<'a> From<&'a [f32]> for Query<'a> {
    fn from(v: &'a [f32]) -> Self {
        Query::Single(v)
    }
}

impl<'a, const N: usize> From<&'a [f32; N]> for Query<'a> {
    fn from(v: &'a [f32; N]) -> Self {
        Query::Single(v)
    }
}

impl<'a> From<&'a Vec<f32>> for Query<'a> {
    fn from(v: &'a Vec<f32>) -> Self {
        Query::Single(v)
    }
}

impl<'a> From<&'a [Vec<f32>]> for Query<'a> {
    fn from(vs: &'a [Vec<f32>]) -> Self {
        Query::Multi(vs)
    }
}

impl<'a> From<&'a Vec<Vec<f32>>> for Query<'a> {
    fn from(vs: &'a Vec<Vec<f32>>) -> Self {
        Query::Multi(vs)
    }
}

/// Snapshot of store size and shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub document_count: usize,
    /// Shared vector length; 0 until the first vector is stored.
    pub vector_dimensions: usize,
    pub chunk_count: usize,
    /// Length of the record last read from or written to storage.
    pub persisted_bytes: usize,
    pub version: u32,
}

pub struct VectorStore {
    entries: Arc<Entries>,
    dimension: usize,
    options: StoreOptions,
    key: String,
    storage: Arc<dyn KeyValueStorage>,
    sink: Arc<dyn DiagnosticSink>,
    flusher: Flusher,
    /// Set when a stored record could not be loaded; the record is left as is until [`VectorStore::clear`].
    writes_held: bool,
}

impl VectorStore {
    /// Opens the store persisted under the options' key and starts its background writer.
    ///
    /// Must be called from within a Tokio runtime. A record in an unsupported
    /// format version always fails the open. Other load faults follow
    /// [`StoreOptions::load_failure`]; under `Report` the store starts empty and
    /// does not write until [`VectorStore::clear`] is called.
    pub fn open(
        options: StoreOptions,
        storage: Arc<dyn KeyValueStorage>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, StoreError> {
        options.validate()?;
        let key = storage_key(options.namespace.as_deref());
        let flusher =
            Flusher::spawn(storage.clone(), key.clone(), sink.clone()).ok_or(StoreError::NoRuntime)?;
        let mut store = Self {
            entries: Arc::new(Entries::new()),
            dimension: 0,
            options,
            key,
            storage,
            sink,
            flusher,
            writes_held: false,
        };
        if let Err(e) = store.hydrate() {
            let fatal = matches!(e, PersistenceError::UnsupportedVersion { .. })
                || matches!(store.options.load_failure, LoadFailurePolicy::Propagate);
            if fatal {
                return Err(e.into());
            }
            store.writes_held = true;
            store.sink.error(&format!(
                "failed to load vector store from {}: {e}; starting empty, \
                 stored record kept until clear",
                store.key
            ));
        }
        Ok(store)
    }

    fn hydrate(&mut self) -> Result<(), PersistenceError> {
        let Some(raw) = self.storage.get(&self.key)? else {
            self.sink.debug(&format!("no persisted vector store under {}", self.key));
            return Ok(());
        };
        self.flusher.set_loaded_bytes(raw.len());
        let decoded = decode(&raw, &self.options.migrations)?;
        let mut dimension = 0;
        for (id, vectors) in &decoded.entries {
            check_vectors(vectors, &mut dimension).map_err(|reason| PersistenceError::InvalidEntry {
                id: id.clone(),
                reason,
            })?;
        }
        self.entries = Arc::new(decoded.entries);
        self.dimension = dimension;
        self.sink.debug(&format!(
            "loaded {} documents from {}",
            self.entries.len(),
            self.key
        ));
        if let Some(from) = decoded.migrated_from {
            self.sink.debug(&format!(
                "migrated {} from format version {from} to {FORMAT_VERSION}",
                self.key
            ));
            self.schedule_flush();
        }
        Ok(())
    }

    /// Adds or replaces a document. Nothing changes if any of its vectors is invalid.
    pub fn add(&mut self, document: EmbeddingDocument) -> Result<(), StoreError> {
        let mut dimension = self.dimension;
        check_document(&document, &mut dimension)?;
        self.dimension = dimension;
        let chunks = document.vectors.len();
        Arc::make_mut(&mut self.entries).insert(document.id.clone(), document.vectors);
        self.sink
            .debug(&format!("added document {} ({chunks} chunks)", document.id));
        self.schedule_flush();
        Ok(())
    }

    /// Adds or replaces several documents. All of them are validated before any is stored.
    pub fn add_batch(&mut self, documents: Vec<EmbeddingDocument>) -> Result<(), StoreError> {
        let mut dimension = self.dimension;
        for document in &documents {
            check_document(document, &mut dimension)?;
        }
        self.dimension = dimension;
        let count = documents.len();
        let entries = Arc::make_mut(&mut self.entries);
        for document in documents {
            entries.insert(document.id, document.vectors);
        }
        self.sink.debug(&format!("added batch of {count} documents"));
        self.schedule_flush();
        Ok(())
    }

    /// Removes a document. Returns whether it was present.
    pub fn delete(&mut self, id: &str) -> bool {
        let removed = self.entries.contains_key(id);
        if removed {
            Arc::make_mut(&mut self.entries).shift_remove(id);
            self.sink.debug(&format!("deleted document {id}"));
        }
        self.schedule_flush();
        removed
    }

    /// Removes every document. The dimension stays fixed.
    ///
    /// Also resumes writing after a load failure, replacing the unreadable record.
    pub fn clear(&mut self) {
        self.entries = Arc::new(Entries::new());
        self.writes_held = false;
        self.sink.debug("cleared vector store");
        self.schedule_flush();
    }

    /// Ranks documents against `query` and returns the best `lookups` of them.
    ///
    /// Per query vector, a document scores `max · max_weight + avg · (1 - max_weight)`
    /// over its chunk similarities; several query vectors are averaged. Equal
    /// scores keep insertion order.
    pub fn find_similar<'q>(&self, query: impl Into<Query<'q>>) -> Result<Vec<SearchHit>, StoreError> {
        let queries = query.into().vectors();
        if queries.is_empty() || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(q) = queries.iter().find(|q| q.len() != self.dimension) {
            return Err(StoreError::QueryDimension {
                expected: self.dimension,
                actual: q.len(),
            });
        }
        let mut scored: Vec<(&str, f32)> = self
            .entries
            .iter()
            .map(|(id, chunks)| {
                let total: f32 = queries.iter().map(|q| self.score_document(q, chunks)).sum();
                (id.as_str(), total / queries.len() as f32)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(self.options.lookups)
            .map(|(id, score)| SearchHit {
                id: id.to_string(),
                score,
            })
            .collect())
    }

    fn score_document(&self, query: &[f32], chunks: &[Vec<f32>]) -> f32 {
        let similarity = self.options.similarity;
        let scores: Vec<f32> = chunks.iter().map(|c| similarity.score(query, c)).collect();
        blend(&scores, self.options.max_weight)
    }

    /// Number of distinct documents.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[Vec<f32>]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    /// Document ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            document_count: self.entries.len(),
            vector_dimensions: self.dimension,
            chunk_count: self.entries.values().map(Vec::len).sum(),
            persisted_bytes: self.flusher.persisted_bytes(),
            version: FORMAT_VERSION,
        }
    }

    /// Waits until every write scheduled so far has landed in storage.
    /// Write faults are reported to the diagnostic sink, not returned.
    pub async fn flush(&self) {
        self.flusher.flush().await;
    }

    fn schedule_flush(&self) {
        if self.writes_held {
            self.sink.debug(&format!(
                "not persisting to {}: stored record failed to load",
                self.key
            ));
            return;
        }
        self.flusher.schedule(Arc::clone(&self.entries));
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("key", &self.key)
            .field("documents", &self.entries.len())
            .field("dimension", &self.dimension)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Why a document's vectors were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationReason {
    #[error("document has no vectors")]
    NoVectors,
    #[error("vector {index} is empty")]
    EmptyVector { index: usize },
    #[error("vector {index} has a non-finite element at position {position}")]
    NonFinite { index: usize, position: usize },
    #[error("vector {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

fn check_document(document: &EmbeddingDocument, dimension: &mut usize) -> Result<(), StoreError> {
    check_vectors(&document.vectors, dimension).map_err(|reason| StoreError::Validation {
        id: document.id.clone(),
        reason,
    })
}

/// Checks `vectors` against `dimension`, fixing it from the first vector when it is still 0.
fn check_vectors(vectors: &[Vec<f32>], dimension: &mut usize) -> Result<(), ValidationReason> {
    if vectors.is_empty() {
        return Err(ValidationReason::NoVectors);
    }
    for (index, v) in vectors.iter().enumerate() {
        if v.is_empty() {
            return Err(ValidationReason::EmptyVector { index });
        }
        if let Some(position) = v.iter().position(|x| !x.is_finite()) {
            return Err(ValidationReason::NonFinite { index, position });
        }
        if *dimension == 0 {
            *dimension = v.len();
        } else if v.len() != *dimension {
            return Err(ValidationReason::DimensionMismatch {
                index,
                expected: *dimension,
                actual: v.len(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid document {id}: {reason}")]
    Validation { id: String, reason: ValidationReason },
    #[error("query vector has {actual} dimensions, store holds {expected}")]
    QueryDimension { expected: usize, actual: usize },
    #[error("vector store must be opened inside a Tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Options(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
