//! Nonlinear dimensionality reduction.
//!
//! Two sequential phases: a k-nearest-neighbor graph with fuzzy edge weights
//! ([`knn`]), then stochastic gradient layout optimization placing points in
//! the target dimensionality ([`layout`]). Graph-connected points attract; a
//! sampled subset of all pairs repels; `min_dist` governs the balance.
//!
//! Every dataset is reduced twice: once at the clustering dimensionality
//! with `min_dist` near zero (tight, separable clusters) and once to 2-D
//! with a larger `min_dist` (readable spread).
//!
//! A reduction never returns a degenerate layout as a silent success: the
//! post-hoc validator ([`validate`]) runs on every result, and non-finite or
//! collapsed output raises a numeric-anomaly error instead.

pub mod knn;
pub mod layout;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::error::{CartographError, Result};
use crate::util::{CancelToken, StageProgress};
use crate::vector::distance::DistanceMetric;

/// Configuration for one reduction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Output dimensionality.
    pub target_dim: usize,
    /// Neighbors per point in the proximity graph.
    pub n_neighbors: usize,
    /// Minimum separation pressure in the layout; near zero packs clusters
    /// tightly, larger values spread points for readability.
    pub min_dist: f32,
    /// Optimization epoch budget. Termination is guaranteed: the learning
    /// rate decays to zero across exactly this many epochs.
    pub n_iterations: usize,
    /// Random repulsion samples per attractive update.
    pub negative_sample_rate: usize,
    /// Initial learning rate.
    pub learning_rate: f32,
    /// Distance metric for the neighbor graph.
    pub metric: DistanceMetric,
    /// RNG seed; fixed seed makes layouts reproducible.
    pub seed: u64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            target_dim: 2,
            n_neighbors: 15,
            min_dist: 0.1,
            n_iterations: 500,
            negative_sample_rate: 5,
            learning_rate: 1.0,
            metric: DistanceMetric::Euclidean,
            seed: 42,
        }
    }
}

impl ReduceConfig {
    /// Preset for the clustering-dimensional reduction.
    pub fn clustering() -> Self {
        Self {
            target_dim: 15,
            min_dist: 0.0,
            ..Self::default()
        }
    }

    /// Preset for the 2-D visualization reduction.
    pub fn visualization() -> Self {
        Self::default()
    }
}

/// Reduce `vectors` to `config.target_dim` coordinates per point.
///
/// Progress is reported once per optimization epoch; the cancel token is
/// polled at the same cadence.
pub fn reduce(
    vectors: &[Vec<f32>],
    config: &ReduceConfig,
    progress: StageProgress<'_>,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f32>>> {
    if config.target_dim == 0 {
        return Err(CartographError::input_validation(
            "target dimensionality must be positive",
        ));
    }
    let n = vectors.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let dimension = vectors[0].len();
    if dimension == 0 {
        return Err(CartographError::input_validation("input vectors are empty"));
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(CartographError::consistency(
                "input vectors have mixed dimensions",
            ));
        }
    }
    if n == 1 {
        return Ok(vec![vec![0.0; config.target_dim]]);
    }

    // More neighbors than points cannot be satisfied; clamp instead of
    // failing the run.
    let k = config.n_neighbors.clamp(1, n - 1);

    let graph = knn::build_knn_graph(vectors, k, config.metric, config.seed)?;
    cancel.check("neighbor graph construction")?;

    let fuzzy = knn::fuzzy_graph(&graph, k);
    let coords = layout::optimize_layout(&fuzzy, n, config, progress, cancel)?;

    validate::validate_layout(&coords)
        .map_err(|failure| CartographError::numeric(failure.to_string()))?;

    Ok(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageKind;
    use crate::util::NoopProgress;

    /// Fixed 20-point, 8-dim input: two displaced groups with small
    /// deterministic jitter.
    fn synthetic_points() -> Vec<Vec<f32>> {
        (0..20)
            .map(|i| {
                let base = if i < 10 { 0.0 } else { 5.0 };
                (0..8)
                    .map(|d| base + ((i * 8 + d) as f32 * 0.137).sin() * 0.05)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_projection_is_finite_and_valid() {
        let progress = NoopProgress;
        let coords = reduce(
            &synthetic_points(),
            &ReduceConfig::visualization(),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(coords.len(), 20);
        for point in &coords {
            assert_eq!(point.len(), 2);
            assert!(point.iter().all(|value| value.is_finite()));
        }
        assert!(validate::validate_layout(&coords).is_ok());
    }

    #[test]
    fn test_reduction_is_reproducible_for_fixed_seed() {
        let progress = NoopProgress;
        let run = || {
            reduce(
                &synthetic_points(),
                &ReduceConfig::clustering(),
                StageProgress::new(&progress, StageKind::ReducingClustering),
                &CancelToken::new(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_groups_stay_separated() {
        let progress = NoopProgress;
        let coords = reduce(
            &synthetic_points(),
            &ReduceConfig::visualization(),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &CancelToken::new(),
        )
        .unwrap();

        // Centroid gap between the two source groups should exceed the mean
        // within-group spread.
        let centroid = |range: std::ops::Range<usize>| -> Vec<f32> {
            let mut c = vec![0.0; 2];
            for i in range.clone() {
                for d in 0..2 {
                    c[d] += coords[i][d];
                }
            }
            c.iter().map(|v| v / range.len() as f32).collect()
        };
        let ca = centroid(0..10);
        let cb = centroid(10..20);
        let gap = ((ca[0] - cb[0]).powi(2) + (ca[1] - cb[1]).powi(2)).sqrt();

        let spread = |range: std::ops::Range<usize>, c: &[f32]| -> f32 {
            range
                .clone()
                .map(|i| {
                    ((coords[i][0] - c[0]).powi(2) + (coords[i][1] - c[1]).powi(2)).sqrt()
                })
                .sum::<f32>()
                / range.len() as f32
        };
        assert!(gap > spread(0..10, &ca).max(spread(10..20, &cb)));
    }

    #[test]
    fn test_empty_and_single_inputs() {
        let progress = NoopProgress;
        let stage = StageProgress::new(&progress, StageKind::ReducingClustering);

        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(
            reduce(&empty, &ReduceConfig::clustering(), stage, &CancelToken::new())
                .unwrap()
                .is_empty()
        );

        let single = vec![vec![1.0, 2.0, 3.0]];
        let coords =
            reduce(&single, &ReduceConfig::clustering(), stage, &CancelToken::new()).unwrap();
        assert_eq!(coords, vec![vec![0.0; 15]]);
    }

    #[test]
    fn test_cancellation_aborts_with_cancelled_error() {
        let progress = NoopProgress;
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = reduce(
            &synthetic_points(),
            &ReduceConfig::visualization(),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let progress = NoopProgress;
        let bad = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(reduce(
            &bad,
            &ReduceConfig::visualization(),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &CancelToken::new(),
        )
        .is_err());
    }
}
