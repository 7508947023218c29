//! Rank fusion of vector and lexical candidate lists.
//!
//! Fusion is deterministic: fixed candidate lists with fixed scores always
//! produce the same fused ranking. Final ordering is fused score descending,
//! vector-score tiebreak, then id as the last resort.

use serde::{Deserialize, Serialize};

use crate::lexical::index::LexicalHit;
use crate::vector::index::VectorHit;

/// Strategy for combining the two candidate lists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Reciprocal rank fusion: `sum(1 / (k + rank))` over both lists.
    ReciprocalRank {
        /// Dampening constant; 60 is the conventional choice.
        k: f32,
    },
    /// Weighted sum of min-max normalized scores.
    WeightedSum {
        /// Weight on the vector score.
        vector_weight: f32,
        /// Weight on the lexical score.
        lexical_weight: f32,
    },
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::ReciprocalRank { k: 60.0 }
    }
}

/// A hit after fusion, carrying its per-side scores.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    /// Entry id.
    pub id: String,
    /// Fused score.
    pub score: f32,
    /// Similarity from the vector side, if the id appeared there.
    pub vector_score: Option<f32>,
    /// BM25 score from the lexical side, if the id appeared there.
    pub lexical_score: Option<f32>,
}

/// Fuse two ranked candidate lists into one ranking of at most `limit` hits.
pub fn fuse(
    vector_hits: &[VectorHit],
    lexical_hits: &[LexicalHit],
    strategy: &FusionStrategy,
    limit: usize,
) -> Vec<FusedHit> {
    // Preserve first-seen order so equal-scored hits rank deterministically.
    let mut order: Vec<String> = Vec::new();
    let mut merged: ahash::AHashMap<String, FusedHit> = ahash::AHashMap::new();

    for hit in vector_hits {
        merged
            .entry(hit.id.clone())
            .or_insert_with(|| {
                order.push(hit.id.clone());
                FusedHit {
                    id: hit.id.clone(),
                    score: 0.0,
                    vector_score: None,
                    lexical_score: None,
                }
            })
            .vector_score = Some(hit.score);
    }
    for hit in lexical_hits {
        merged
            .entry(hit.id.clone())
            .or_insert_with(|| {
                order.push(hit.id.clone());
                FusedHit {
                    id: hit.id.clone(),
                    score: 0.0,
                    vector_score: None,
                    lexical_score: None,
                }
            })
            .lexical_score = Some(hit.score);
    }

    match strategy {
        FusionStrategy::ReciprocalRank { k } => {
            for (rank, hit) in vector_hits.iter().enumerate() {
                if let Some(fused) = merged.get_mut(&hit.id) {
                    fused.score += 1.0 / (k + rank as f32 + 1.0);
                }
            }
            for (rank, hit) in lexical_hits.iter().enumerate() {
                if let Some(fused) = merged.get_mut(&hit.id) {
                    fused.score += 1.0 / (k + rank as f32 + 1.0);
                }
            }
        }
        FusionStrategy::WeightedSum {
            vector_weight,
            lexical_weight,
        } => {
            let vector_norm = min_max(vector_hits.iter().map(|hit| hit.score));
            let lexical_norm = min_max(lexical_hits.iter().map(|hit| hit.score));
            for fused in merged.values_mut() {
                let vector_component = fused
                    .vector_score
                    .map(|score| vector_norm.normalize(score) * vector_weight)
                    .unwrap_or(0.0);
                let lexical_component = fused
                    .lexical_score
                    .map(|score| lexical_norm.normalize(score) * lexical_weight)
                    .unwrap_or(0.0);
                fused.score = vector_component + lexical_component;
            }
        }
    }

    let mut results: Vec<FusedHit> = order
        .into_iter()
        .filter_map(|id| merged.remove(&id))
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.vector_score
                    .unwrap_or(f32::MIN)
                    .partial_cmp(&a.vector_score.unwrap_or(f32::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}

/// Min-max range captured from one candidate list.
struct MinMaxRange {
    min: f32,
    max: f32,
}

impl MinMaxRange {
    fn normalize(&self, score: f32) -> f32 {
        if self.max > self.min {
            (score - self.min) / (self.max - self.min)
        } else {
            1.0
        }
    }
}

fn min_max(scores: impl Iterator<Item = f32>) -> MinMaxRange {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for score in scores {
        min = min.min(score);
        max = max.max(score);
    }
    MinMaxRange { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_hits() -> Vec<VectorHit> {
        vec![
            VectorHit { id: "a".to_string(), score: 0.9 },
            VectorHit { id: "b".to_string(), score: 0.7 },
            VectorHit { id: "c".to_string(), score: 0.5 },
        ]
    }

    fn lexical_hits() -> Vec<LexicalHit> {
        vec![
            LexicalHit { id: "b".to_string(), score: 12.0 },
            LexicalHit { id: "d".to_string(), score: 8.0 },
        ]
    }

    #[test]
    fn test_rrf_prefers_ids_on_both_lists() {
        let fused = fuse(
            &vector_hits(),
            &lexical_hits(),
            &FusionStrategy::default(),
            10,
        );

        assert_eq!(fused[0].id, "b");
        assert!(fused[0].vector_score.is_some());
        assert!(fused[0].lexical_score.is_some());
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let strategy = FusionStrategy::default();
        let first = fuse(&vector_hits(), &lexical_hits(), &strategy, 10);
        for _ in 0..10 {
            let again = fuse(&vector_hits(), &lexical_hits(), &strategy, 10);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_equal_rrf_ties_break_by_vector_score() {
        // "a" and "d" each appear on exactly one list at the same rank, so
        // their RRF scores are equal; the vector-side hit must win.
        let vector = vec![VectorHit { id: "a".to_string(), score: 0.4 }];
        let lexical = vec![LexicalHit { id: "d".to_string(), score: 3.0 }];

        let fused = fuse(&vector, &lexical, &FusionStrategy::default(), 10);
        assert_eq!(fused[0].id, "a");
        assert_eq!(fused[1].id, "d");
    }

    #[test]
    fn test_weighted_sum_respects_weights() {
        let strategy = FusionStrategy::WeightedSum {
            vector_weight: 1.0,
            lexical_weight: 0.0,
        };
        let fused = fuse(&vector_hits(), &lexical_hits(), &strategy, 10);

        // Lexical-only "d" contributes nothing under a zero lexical weight.
        let d = fused.iter().find(|hit| hit.id == "d").unwrap();
        assert_eq!(d.score, 0.0);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn test_limit_truncates() {
        let fused = fuse(
            &vector_hits(),
            &lexical_hits(),
            &FusionStrategy::default(),
            2,
        );
        assert_eq!(fused.len(), 2);
    }
}
