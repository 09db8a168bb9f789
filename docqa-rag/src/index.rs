//! In-memory vector index using cosine similarity.
//!
//! A [`VectorIndex`] is built once per uploaded document from its chunks and
//! their embeddings, and answers top-k queries in either plain
//! nearest-neighbour or diversity-aware ([`mmr`](crate::mmr)) mode. There is
//! no incremental update: a new document means a new index.

use std::cmp::Ordering;

use crate::config::RetrievalMode;
use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::mmr::{MmrCandidate, mmr_select};

/// An immutable collection of embedded chunks supporting similarity queries.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{RetrievalMode, VectorIndex};
///
/// let index = VectorIndex::build(chunks, embeddings)?;
/// let results = index.query(&question_vector, 5, RetrievalMode::Similarity);
/// ```
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    dimensions: usize,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Descending score, then ascending chunk position.
fn rank(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.position.cmp(&b.chunk.position))
}

impl VectorIndex {
    /// Build a fresh index, attaching `embeddings[i]` to `chunks[i]`.
    ///
    /// Chunks are stored in position order regardless of input order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Service`] if the counts differ or the embeddings
    /// do not share one dimensionality, since both indicate a malformed
    /// embedding-service response.
    pub fn build(chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::service(
                "embeddings",
                format!("{} chunks but {} embeddings", chunks.len(), embeddings.len()),
            ));
        }
        let dimensions = embeddings.first().map_or(0, Vec::len);
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimensions) {
            return Err(RagError::service(
                "embeddings",
                format!("inconsistent dimensions: expected {dimensions}, got {}", bad.len()),
            ));
        }

        let mut chunks: Vec<Chunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(mut chunk, embedding)| {
                chunk.embedding = embedding;
                chunk
            })
            .collect();
        chunks.sort_by_key(|c| c.position);

        Ok(Self { chunks, dimensions })
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dimensionality of the stored embeddings (0 for an empty index).
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The indexed chunks in position order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return at most `k` chunks for `query`.
    ///
    /// In [`RetrievalMode::Similarity`] results are ordered by descending
    /// score with earlier positions first on ties. In [`RetrievalMode::Mmr`]
    /// the `fetch_k` best candidates are re-selected for diversity and
    /// returned in selection order. Fewer than `k` results come back only
    /// when the index holds fewer than `k` chunks.
    pub fn query(&self, query: &[f32], k: usize, mode: RetrievalMode) -> Vec<SearchResult> {
        match mode {
            RetrievalMode::Similarity => self.nearest(query, k),
            RetrievalMode::Mmr { fetch_k, lambda } => {
                let candidates = self.nearest(query, fetch_k.max(k));
                let pool: Vec<MmrCandidate<'_>> = candidates
                    .iter()
                    .map(|r| MmrCandidate {
                        position: r.chunk.position,
                        relevance: r.score,
                        vector: &r.chunk.embedding,
                    })
                    .collect();
                let picked = mmr_select(&pool, k, lambda);
                picked.into_iter().map(|i| candidates[i].clone()).collect()
            }
        }
    }

    fn nearest(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        let mut scored: Vec<SearchResult> = self
            .chunks
            .iter()
            .map(|chunk| SearchResult {
                score: cosine_similarity(&chunk.embedding, query),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(rank);
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn chunk(position: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("doc#{position}"),
            text: text.to_string(),
            embedding: Vec::new(),
            metadata: HashMap::new(),
            position,
        }
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn build_rejects_mismatched_inputs() {
        assert!(VectorIndex::build(vec![chunk(0, "a")], vec![]).is_err());
        assert!(
            VectorIndex::build(
                vec![chunk(0, "a"), chunk(1, "b")],
                vec![vec![1.0, 0.0], vec![1.0]]
            )
            .is_err()
        );
    }

    #[test]
    fn ties_are_broken_by_position() {
        let index = VectorIndex::build(
            vec![chunk(2, "c"), chunk(0, "a"), chunk(1, "b")],
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let results = index.query(&[1.0, 0.0], 3, RetrievalMode::Similarity);
        let positions: Vec<usize> = results.iter().map(|r| r.chunk.position).collect();
        assert_eq!(positions, vec![0, 2, 1]);
    }

    #[test]
    fn small_index_returns_fewer_than_k() {
        let index = VectorIndex::build(vec![chunk(0, "a")], vec![vec![1.0]]).unwrap();
        assert_eq!(index.query(&[1.0], 5, RetrievalMode::Similarity).len(), 1);
        assert!(VectorIndex::default().query(&[1.0], 5, RetrievalMode::Similarity).is_empty());
    }

    #[test]
    fn mmr_skips_near_duplicates() {
        let index = VectorIndex::build(
            vec![chunk(0, "etch"), chunk(1, "etch again"), chunk(2, "deposition")],
            vec![vec![1.0, 0.0], vec![0.99, -0.01], vec![0.6, 0.8]],
        )
        .unwrap();

        let plain = index.query(&[1.0, 0.1], 2, RetrievalMode::Similarity);
        assert_eq!(plain.iter().map(|r| r.chunk.position).collect::<Vec<_>>(), vec![0, 1]);

        let diverse = index.query(&[1.0, 0.1], 2, RetrievalMode::Mmr { fetch_k: 3, lambda: 0.5 });
        assert_eq!(diverse.iter().map(|r| r.chunk.position).collect::<Vec<_>>(), vec![0, 2]);
    }
}
