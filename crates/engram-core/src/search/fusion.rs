//! Rank fusion
//!
//! Weighted Reciprocal Rank Fusion over the vector and lexical branches:
//! `score(d) = Σ_branch w_branch / (k + rank_branch)` with ranks starting
//! at 1 and a missing branch contributing nothing (rank ∞). RRF is
//! scale-free across branches, which is exactly what mixing cosine
//! similarities with BM25 scores needs.

use std::collections::HashMap;

/// Fusion constant; dampens the effect of early ranks
pub const DEFAULT_RRF_K: f64 = 60.0;

/// A fused candidate with its per-branch ranks preserved for explanations.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: i64,
    pub score: f64,
    /// 1-based rank in the vector branch, if present there
    pub vector_rank: Option<usize>,
    /// 1-based rank in the lexical branch, if present there
    pub lexical_rank: Option<usize>,
}

/// Fuse two ranked branches with weighted RRF.
///
/// Input slices are `(id, branch_score)` in branch order, best first; only
/// the order matters to the fused score. Output is sorted by fused score
/// descending with ties left to the caller's tie-break policy.
pub fn rrf_fuse(
    vector: &[(i64, f32)],
    lexical: &[(i64, f32)],
    k: f64,
    vector_weight: f64,
    lexical_weight: f64,
) -> Vec<FusedHit> {
    let mut merged: HashMap<i64, FusedHit> = HashMap::with_capacity(vector.len() + lexical.len());

    for (rank0, (id, _)) in vector.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = merged.entry(*id).or_insert(FusedHit {
            id: *id,
            score: 0.0,
            vector_rank: None,
            lexical_rank: None,
        });
        entry.score += vector_weight / (k + rank as f64);
        entry.vector_rank = Some(rank);
    }

    for (rank0, (id, _)) in lexical.iter().enumerate() {
        let rank = rank0 + 1;
        let entry = merged.entry(*id).or_insert(FusedHit {
            id: *id,
            score: 0.0,
            vector_rank: None,
            lexical_rank: None,
        });
        entry.score += lexical_weight / (k + rank as f64);
        entry.lexical_rank = Some(rank);
    }

    let mut hits: Vec<FusedHit> = merged.into_values().collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

/// Normalize a branch's scores into [0,1] by its maximum.
///
/// Cosine similarities are already normalized; BM25 scores are not. The
/// short-circuit decision needs both on the same scale.
pub fn normalize_scores(results: &[(i64, f32)]) -> Vec<(i64, f32)> {
    let max = results.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
    if max <= 0.0 {
        return results.to_vec();
    }
    results.iter().map(|(id, s)| (*id, s / max)).collect()
}

/// Whether a branch's top normalized score clears the short-circuit bar.
pub fn short_circuits(normalized: &[(i64, f32)], threshold: f64) -> bool {
    normalized
        .first()
        .map(|(_, score)| *score as f64 >= threshold)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(ids: &[i64]) -> Vec<(i64, f32)> {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| (*id, 1.0 - rank as f32 * 0.1))
            .collect()
    }

    #[test]
    fn items_in_both_branches_win() {
        let vector = branch(&[1, 2, 3]);
        let lexical = branch(&[2, 1, 4]);

        let fused = rrf_fuse(&vector, &lexical, DEFAULT_RRF_K, 1.0, 1.0);

        // 1 and 2 appear in both lists; 3 and 4 in one each
        assert!(fused[0].id == 1 || fused[0].id == 2);
        assert!(fused[1].id == 1 || fused[1].id == 2);

        for window in fused.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[test]
    fn branch_ranks_preserved() {
        let vector = branch(&[10, 20]);
        let lexical = branch(&[20]);

        let fused = rrf_fuse(&vector, &lexical, DEFAULT_RRF_K, 1.0, 1.0);

        let twenty = fused.iter().find(|h| h.id == 20).unwrap();
        assert_eq!(twenty.vector_rank, Some(2));
        assert_eq!(twenty.lexical_rank, Some(1));

        let ten = fused.iter().find(|h| h.id == 10).unwrap();
        assert_eq!(ten.vector_rank, Some(1));
        assert_eq!(ten.lexical_rank, None);
    }

    #[test]
    fn improving_vector_rank_never_lowers_fused_score() {
        // Monotonicity: with the lexical branch fixed, moving an item up in
        // the vector branch can only raise its fused score.
        let lexical = branch(&[5, 6, 7]);

        let worse = rrf_fuse(&branch(&[6, 7, 5]), &lexical, DEFAULT_RRF_K, 1.0, 1.0);
        let better = rrf_fuse(&branch(&[5, 6, 7]), &lexical, DEFAULT_RRF_K, 1.0, 1.0);

        let score = |hits: &[FusedHit], id: i64| hits.iter().find(|h| h.id == id).unwrap().score;
        assert!(score(&better, 5) > score(&worse, 5));
    }

    #[test]
    fn weights_shift_the_balance() {
        let vector = branch(&[1]);
        let lexical = branch(&[2]);

        let fused = rrf_fuse(&vector, &lexical, DEFAULT_RRF_K, 2.0, 0.5);
        assert_eq!(fused[0].id, 1);

        let fused = rrf_fuse(&vector, &lexical, DEFAULT_RRF_K, 0.5, 2.0);
        assert_eq!(fused[0].id, 2);
    }

    #[test]
    fn empty_branches_are_fine() {
        let fused = rrf_fuse(&[], &[], DEFAULT_RRF_K, 1.0, 1.0);
        assert!(fused.is_empty());

        let one = branch(&[9]);
        let fused = rrf_fuse(&one, &[], DEFAULT_RRF_K, 1.0, 1.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].id, 9);
    }

    #[test]
    fn normalization_and_short_circuit() {
        let raw = vec![(1, 12.0), (2, 6.0), (3, 3.0)];
        let normalized = normalize_scores(&raw);
        assert!((normalized[0].1 - 1.0).abs() < 1e-6);
        assert!((normalized[1].1 - 0.5).abs() < 1e-6);

        assert!(short_circuits(&normalized, 0.85));
        assert!(!short_circuits(&normalized[1..], 0.85));
        assert!(!short_circuits(&[], 0.85));
    }
}
