//! Property tests for vector index query ordering.

use std::collections::HashMap;

use docqa_rag::document::Chunk;
use docqa_rag::{RetrievalMode, VectorIndex};
use proptest::prelude::*;

const DIM: usize = 16;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero embedding", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-8 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

fn chunk(position: usize) -> Chunk {
    Chunk {
        id: format!("doc#{position}"),
        text: format!("chunk {position}"),
        embedding: Vec::new(),
        metadata: HashMap::new(),
        position,
    }
}

/// Build an index whose chunks are handed over in reverse position order.
fn reversed_index(embeddings: Vec<Vec<f32>>) -> VectorIndex {
    let chunks: Vec<Chunk> = (0..embeddings.len()).rev().map(chunk).collect();
    let embeddings: Vec<Vec<f32>> = embeddings.into_iter().rev().collect();
    VectorIndex::build(chunks, embeddings).unwrap()
}

mod prop_similarity_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Results are ranked by descending score, ties by ascending position,
        /// and exactly `min(k, len)` come back.
        #[test]
        fn ranked_and_sized_exactly(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            k in 1usize..25,
        ) {
            let count = embeddings.len();
            let index = reversed_index(embeddings);
            let results = index.query(&query, k, RetrievalMode::Similarity);

            prop_assert_eq!(results.len(), k.min(count));
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score > window[1].score
                        || (window[0].score == window[1].score
                            && window[0].chunk.position < window[1].chunk.position),
                    "results out of order: {:?} then {:?}",
                    (window[0].score, window[0].chunk.position),
                    (window[1].score, window[1].chunk.position),
                );
            }
        }

        /// Duplicated vectors always surface in position order.
        #[test]
        fn identical_vectors_tie_break_by_position(
            embedding in arb_normalized_embedding(DIM),
            copies in 2usize..8,
        ) {
            let index = reversed_index(vec![embedding.clone(); copies]);
            let positions: Vec<usize> = index
                .query(&embedding, copies, RetrievalMode::Similarity)
                .iter()
                .map(|r| r.chunk.position)
                .collect();
            prop_assert_eq!(positions, (0..copies).collect::<Vec<_>>());
        }
    }
}

mod prop_mmr_selection {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Diversity-aware retrieval returns distinct chunks drawn from the
        /// `fetch_k` nearest candidates, and exactly `min(k, len)` of them.
        #[test]
        fn selects_distinct_chunks_from_candidate_pool(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            k in 1usize..8,
            extra in 0usize..8,
            lambda in 0.0f32..=1.0,
        ) {
            let count = embeddings.len();
            let index = reversed_index(embeddings);
            let fetch_k = k + extra;

            let pool: Vec<usize> = index
                .query(&query, fetch_k, RetrievalMode::Similarity)
                .iter()
                .map(|r| r.chunk.position)
                .collect();
            let picked: Vec<usize> = index
                .query(&query, k, RetrievalMode::Mmr { fetch_k, lambda })
                .iter()
                .map(|r| r.chunk.position)
                .collect();

            prop_assert_eq!(picked.len(), k.min(count));
            let mut unique = picked.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), picked.len());
            prop_assert!(picked.iter().all(|p| pool.contains(p)));
        }

        /// With `lambda = 1` the first pick is the most similar chunk.
        #[test]
        fn pure_relevance_starts_with_nearest(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
        ) {
            let index = reversed_index(embeddings);
            let nearest = index.query(&query, 1, RetrievalMode::Similarity);
            let mmr = index.query(&query, 1, RetrievalMode::Mmr { fetch_k: 5, lambda: 1.0 });
            prop_assert_eq!(nearest[0].chunk.position, mmr[0].chunk.position);
        }
    }
}
