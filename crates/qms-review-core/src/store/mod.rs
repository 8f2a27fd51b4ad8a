//! Bounded-capacity similarity index over chunk embeddings.
//!
//! The [`RetrievalStore`] is constructed once by the application and shared
//! by reference (`Arc`) with every reviewer, the procedure agent, and the
//! HTTP server. It is safe to search while another task inserts: embedding
//! happens outside the lock, and every mutation of the index (insert,
//! eviction, clear) is applied under a single write lock, so readers observe
//! either the state before or after it.
//!
//! # Capacity
//!
//! Two watermarks control eviction:
//!
//! | Limit | Default | Meaning |
//! |-------|---------|---------|
//! | `max_capacity` | 10 000 | size never exceeds this |
//! | `target_watermark` | 8 000 | size after an eviction |
//!
//! When an insert would push the size past `max_capacity`, the oldest
//! entries are evicted by rebuilding the index from the retained entries.
//! Each entry keeps its embedding, so a rebuild never calls the embedding
//! backend.

mod index;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{ConfigError, RetrievalError};
use crate::models::{Chunk, SearchHit, StoreStatus};

use index::Index;

/// Returned by [`render_context`] when a query matched nothing.
pub const NO_RELEVANT_MATERIAL: &str = "No relevant procedure material found.";

/// Separator between passages in a rendered context block.
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// Capacity ceiling and post-eviction size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    max_capacity: usize,
    target_watermark: usize,
}

impl StoreLimits {
    pub const DEFAULT_MAX_CAPACITY: usize = 10_000;
    pub const DEFAULT_TARGET_WATERMARK: usize = 8_000;

    /// Requires `0 < target_watermark < max_capacity`.
    pub fn new(max_capacity: usize, target_watermark: usize) -> Result<Self, ConfigError> {
        if target_watermark == 0 || target_watermark >= max_capacity {
            return Err(ConfigError::InvalidWatermarks {
                max: max_capacity,
                target: target_watermark,
            });
        }
        Ok(Self {
            max_capacity,
            target_watermark,
        })
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn target_watermark(&self) -> usize {
        self.target_watermark
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_capacity: Self::DEFAULT_MAX_CAPACITY,
            target_watermark: Self::DEFAULT_TARGET_WATERMARK,
        }
    }
}

/// In-memory similarity index with two-watermark eviction.
pub struct RetrievalStore {
    embedder: Arc<dyn EmbeddingProvider>,
    limits: StoreLimits,
    index: RwLock<Index>,
}

impl RetrievalStore {
    /// Create an uninitialized store. Call [`initialize`](Self::initialize)
    /// or [`add_chunks`](Self::add_chunks) before searching.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, limits: StoreLimits) -> Self {
        Self {
            embedder,
            limits,
            index: RwLock::new(Index::default()),
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Allocate an empty index. Calling it again is a no-op.
    pub fn initialize(&self) {
        let mut index = self.write();
        if !index.initialized {
            index.initialized = true;
            info!(
                capacity = self.limits.max_capacity,
                embedding_model = self.embedder.model_name(),
                "retrieval store initialized"
            );
        }
    }

    /// Embed and index `chunks`, evicting the oldest entries first when the
    /// batch would exceed `max_capacity`.
    ///
    /// Returns the number of chunks indexed. A batch larger than
    /// `max_capacity` is reduced to its newest `max_capacity` chunks.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::Embedding`] if the backend fails or returns the
    /// wrong number of vectors; the index is left unchanged.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize, RetrievalError> {
        self.initialize();
        if chunks.is_empty() {
            return Ok(0);
        }

        let max = self.limits.max_capacity;
        let accepted = if chunks.len() > max {
            warn!(
                incoming = chunks.len(),
                capacity = max,
                "batch exceeds store capacity; keeping newest chunks only"
            );
            &chunks[chunks.len() - max..]
        } else {
            chunks
        };

        let texts: Vec<String> = accepted.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        if vectors.len() != accepted.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} vectors, got {}",
                accepted.len(),
                vectors.len()
            )));
        }

        let mut index = self.write();
        let current = index.len();
        if current + accepted.len() > max {
            let keep = self.limits.target_watermark.min(max - accepted.len());
            warn!(
                current,
                incoming = accepted.len(),
                retained = keep.min(current),
                "capacity exceeded, evicting oldest entries"
            );
            let evicted = index.rebuild_keeping_newest(keep);
            debug!(evicted, "index rebuilt from retained entries");
        }

        for (chunk, embedding) in accepted.iter().zip(vectors) {
            index.insert(chunk.clone(), embedding);
        }

        info!(added = accepted.len(), total = index.len(), "chunks indexed");
        Ok(accepted.len())
    }

    /// Top-`k` entries by descending cosine similarity to `query`.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::NotInitialized`] before the first
    /// [`initialize`](Self::initialize) / [`add_chunks`](Self::add_chunks),
    /// [`RetrievalError::Embedding`] if the query cannot be embedded.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        {
            let index = self.read();
            if !index.initialized {
                return Err(RetrievalError::NotInitialized);
            }
            if k == 0 || index.is_empty() {
                return Ok(Vec::new());
            }
        }

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        Ok(self.read().top_k(&query_vec, k))
    }

    /// [`search`](Self::search), rendered into one LLM-ready context block
    /// by [`render_context`].
    pub async fn search_with_context(&self, query: &str, k: usize) -> Result<String, RetrievalError> {
        let hits = self.search(query, k).await?;
        Ok(render_context(&hits))
    }

    pub fn status(&self) -> StoreStatus {
        let index = self.read();
        StoreStatus {
            initialized: index.initialized,
            count: index.len(),
            capacity: self.limits.max_capacity,
            target_watermark: self.limits.target_watermark,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every entry and leave the store initialized.
    pub fn clear(&self) {
        let mut index = self.write();
        index.reset();
        info!("retrieval store cleared");
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Join ranked hits into one context block.
///
/// Each passage is prefixed with `[<section header>]`, or `[Section <rank>]`
/// when the chunk has none, and its source identifier. Passages are
/// separated by [`CONTEXT_DELIMITER`]. An empty slice renders as
/// [`NO_RELEVANT_MATERIAL`].
pub fn render_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RELEVANT_MATERIAL.to_string();
    }

    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let label = match &hit.section_header {
                Some(header) => format!("[{}]", header),
                None => format!("[Section {}]", i + 1),
            };
            format!("{} (source: {})\n{}", label, hit.source_id, hit.content)
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}
