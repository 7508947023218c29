//! Exact flat vector index over parallel arrays.

use rayon::prelude::*;

use crate::error::{CartographError, Result};
use crate::vector::distance::DistanceMetric;

/// A scored vector hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Entry id.
    pub id: String,
    /// Similarity score (higher is more similar).
    pub score: f32,
}

/// Flat (brute force) vector index.
///
/// Stores ids and vectors as parallel arrays and scores every stored vector
/// per query. Exact by design; the reducer's neighbor graph is the only
/// place approximation is allowed.
#[derive(Debug, Clone, Default)]
pub struct FlatVectorIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
    metric: DistanceMetric,
}

impl FlatVectorIndex {
    /// Build an index from parallel id/vector arrays.
    ///
    /// All vectors must share one dimension; the id and vector arrays must
    /// have equal length.
    pub fn build(ids: Vec<String>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        Self::build_with_metric(ids, vectors, DistanceMetric::Cosine)
    }

    /// Build with an explicit distance metric.
    pub fn build_with_metric(
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        if ids.len() != vectors.len() {
            return Err(CartographError::consistency(format!(
                "id/vector array length mismatch: {} ids, {} vectors",
                ids.len(),
                vectors.len()
            )));
        }

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            if vector.len() != dimension {
                return Err(CartographError::consistency(format!(
                    "vector for '{id}' has dimension {}, expected {dimension}",
                    vector.len()
                )));
            }
        }

        Ok(Self {
            ids,
            vectors,
            dimension,
            metric,
        })
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dimensionality of stored vectors (0 when empty).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The stored vector for an id, if present.
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.ids
            .iter()
            .position(|stored| stored == id)
            .map(|ordinal| self.vectors[ordinal].as_slice())
    }

    /// Search for the `k` most similar vectors above `min_score`.
    ///
    /// Similarity is computed against every stored vector; results are
    /// descending by score with insertion-order tiebreak.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<VectorHit>> {
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(CartographError::index(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let scores: Vec<f32> = self
            .vectors
            .par_iter()
            .map(|vector| self.metric.similarity(query, vector).unwrap_or(f32::MIN))
            .collect();

        let mut candidates: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score >= min_score)
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .map(|(ordinal, score)| VectorHit {
                id: self.ids[ordinal].clone(),
                score,
            })
            .collect())
    }
}
