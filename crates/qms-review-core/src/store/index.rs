//! Flat vector index backing [`RetrievalStore`](super::RetrievalStore).

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, SearchHit};

/// A chunk with its cached embedding and insertion sequence number.
pub(super) struct IndexedEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub inserted_at: u64,
}

/// Entries kept in insertion order, oldest first.
#[derive(Default)]
pub(super) struct Index {
    pub initialized: bool,
    entries: Vec<IndexedEntry>,
    next_seq: u64,
}

impl Index {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) {
        let inserted_at = self.next_seq;
        self.next_seq += 1;
        self.entries.push(IndexedEntry {
            chunk,
            embedding,
            inserted_at,
        });
    }

    /// Replace the entries with a fresh index holding only the newest
    /// `keep`. Returns how many were evicted.
    pub fn rebuild_keeping_newest(&mut self, keep: usize) -> usize {
        if self.entries.len() <= keep {
            return 0;
        }
        let evicted = self.entries.len() - keep;
        let old = std::mem::take(&mut self.entries);
        let mut retained = Vec::with_capacity(keep);
        retained.extend(old.into_iter().skip(evicted));
        self.entries = retained;
        evicted
    }

    /// Empty and initialized. Sequence numbers keep increasing.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.initialized = true;
    }

    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<(f32, &IndexedEntry)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.inserted_at.cmp(&b.1.inserted_at))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, e)| SearchHit {
                content: e.chunk.content.clone(),
                source_id: e.chunk.source_id.clone(),
                section_header: e.chunk.section_header.clone(),
                score,
            })
            .collect()
    }
}
