//! Maximal Marginal Relevance (MMR) for diversity-aware retrieval.
//!
//! MMR reranks candidates to balance relevance and redundancy:
//! `MMR = λ × sim(query, doc) − (1 − λ) × max(sim(doc, selected))`
//!
//! λ = 1.0: pure relevance (plain nearest-neighbour order)
//! λ = 0.5: balanced relevance + diversity
//! λ = 0.0: pure diversity

use crate::index::cosine_similarity;

/// A candidate for MMR selection.
#[derive(Debug, Clone, Copy)]
pub struct MmrCandidate<'a> {
    /// Chunk sequence position, used to break ties.
    pub position: usize,
    /// Similarity to the query.
    pub relevance: f32,
    /// The candidate's embedding.
    pub vector: &'a [f32],
}

/// Greedily select up to `k` candidates maximising marginal relevance.
///
/// Returns indices into `candidates` in selection order. Equal scores go to
/// the earlier chunk position.
pub fn mmr_select(candidates: &[MmrCandidate<'_>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    let lambda = lambda.clamp(0.0, 1.0);
    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (slot, &idx) in remaining.iter().enumerate() {
            let candidate = &candidates[idx];
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(candidate.vector, candidates[s].vector))
                .fold(0.0f32, f32::max);
            let score = lambda * candidate.relevance - (1.0 - lambda) * redundancy;

            let better = match best {
                None => true,
                Some((best_slot, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && candidate.position < candidates[remaining[best_slot]].position)
                }
            };
            if better {
                best = Some((slot, score));
            }
        }

        let Some((slot, _)) = best else { break };
        selected.push(remaining.remove(slot));
    }

    selected
}
