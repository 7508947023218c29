//! Stochastic gradient layout optimization.
//!
//! Points connected in the fuzzy graph attract, sampled random pairs repel.
//! Every coordinate update is kept finite, per-step gradients are clamped,
//! and the learning rate decays linearly to zero across the epoch budget so
//! the optimization always terminates.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::reduce::ReduceConfig;
use crate::reduce::knn::FuzzyGraph;
use crate::util::{CancelToken, StageProgress};

/// Per-component gradient clamp.
const GRADIENT_CLIP: f32 = 4.0;

/// Stabilizer in the repulsive gradient denominator.
const REPULSION_EPSILON: f32 = 0.001;

/// Half-width of the uniform random initialization cube.
const INIT_RANGE: f32 = 10.0;

/// Attraction/repulsion curve anchors: `(min_dist, a, b)`. Values between
/// anchors interpolate linearly; values outside clamp to the nearest anchor.
const CURVE_ANCHORS: [(f32, f32, f32); 3] = [
    (0.0, 1.93, 0.79),
    (0.1, 1.577, 0.895),
    (0.5, 0.58, 1.0),
];

/// The `(a, b)` pair of the low-dimensional similarity curve for a
/// `min_dist` setting.
pub fn curve_params(min_dist: f32) -> (f32, f32) {
    let (first_d, first_a, first_b) = CURVE_ANCHORS[0];
    if min_dist <= first_d {
        return (first_a, first_b);
    }
    for window in CURVE_ANCHORS.windows(2) {
        let (d0, a0, b0) = window[0];
        let (d1, a1, b1) = window[1];
        if min_dist <= d1 {
            let t = (min_dist - d0) / (d1 - d0);
            return (a0 + (a1 - a0) * t, b0 + (b1 - b0) * t);
        }
    }
    let (_, last_a, last_b) = CURVE_ANCHORS[CURVE_ANCHORS.len() - 1];
    (last_a, last_b)
}

/// Optimize a layout for `n_points` in `config.target_dim` dimensions.
///
/// Deterministic for a fixed seed: the epoch loop is single-threaded and all
/// randomness comes from one seeded generator.
pub fn optimize_layout(
    fuzzy: &FuzzyGraph,
    n_points: usize,
    config: &ReduceConfig,
    progress: StageProgress<'_>,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f32>>> {
    let dim = config.target_dim;
    let (a, b) = curve_params(config.min_dist);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut coords: Vec<f32> = (0..n_points * dim)
        .map(|_| rng.random_range(-INIT_RANGE..INIT_RANGE))
        .collect();

    let epochs = config.n_iterations.max(1);
    for epoch in 0..epochs {
        cancel.check("layout optimization")?;
        let alpha = config.learning_rate * (1.0 - epoch as f32 / epochs as f32);

        for edge in &fuzzy.edges {
            // Sample edges by membership strength.
            if rng.random::<f32>() > edge.weight {
                continue;
            }
            let head = edge.head as usize * dim;
            let tail = edge.tail as usize * dim;

            let d2 = squared_distance(&coords, head, tail, dim);
            if d2 > 0.0 {
                let coeff = (-2.0 * a * b * d2.powf(b - 1.0)) / (1.0 + a * d2.powf(b));
                for d in 0..dim {
                    let grad = (coeff * (coords[head + d] - coords[tail + d]))
                        .clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                    apply(&mut coords, head + d, alpha * grad);
                    apply(&mut coords, tail + d, -alpha * grad);
                }
            }

            for _ in 0..config.negative_sample_rate {
                let other = rng.random_range(0..n_points);
                if other == edge.head as usize {
                    continue;
                }
                let other = other * dim;
                let d2 = squared_distance(&coords, head, other, dim);
                let coeff = (2.0 * b) / ((REPULSION_EPSILON + d2) * (1.0 + a * d2.powf(b)));
                for d in 0..dim {
                    let grad = (coeff * (coords[head + d] - coords[other + d]))
                        .clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                    apply(&mut coords, head + d, alpha * grad);
                }
            }
        }

        progress.report((epoch + 1) as f32 / epochs as f32);
    }

    Ok(coords
        .chunks(dim)
        .map(|point| point.to_vec())
        .collect())
}

/// Apply a delta, clamping any non-finite result to zero instead of letting
/// it propagate.
fn apply(coords: &mut [f32], index: usize, delta: f32) {
    let next = coords[index] + delta;
    coords[index] = if next.is_finite() { next } else { 0.0 };
}

fn squared_distance(coords: &[f32], a: usize, b: usize, dim: usize) -> f32 {
    (0..dim)
        .map(|d| {
            let diff = coords[a + d] - coords[b + d];
            diff * diff
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageKind;
    use crate::reduce::knn::FuzzyEdge;
    use crate::util::{CollectingProgress, NoopProgress};

    fn tiny_graph() -> FuzzyGraph {
        FuzzyGraph {
            edges: vec![
                FuzzyEdge { head: 0, tail: 1, weight: 1.0 },
                FuzzyEdge { head: 2, tail: 3, weight: 1.0 },
            ],
        }
    }

    fn config(n_iterations: usize) -> ReduceConfig {
        ReduceConfig {
            target_dim: 2,
            n_iterations,
            ..ReduceConfig::default()
        }
    }

    #[test]
    fn test_connected_pairs_end_up_closer_than_unconnected() {
        let progress = NoopProgress;
        let coords = optimize_layout(
            &tiny_graph(),
            4,
            &config(200),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &CancelToken::new(),
        )
        .unwrap();

        let dist = |i: usize, j: usize| -> f32 {
            ((coords[i][0] - coords[j][0]).powi(2) + (coords[i][1] - coords[j][1]).powi(2)).sqrt()
        };
        assert!(dist(0, 1) < dist(0, 2));
        assert!(dist(2, 3) < dist(1, 3));
    }

    #[test]
    fn test_progress_reported_per_epoch() {
        let progress = CollectingProgress::new();
        optimize_layout(
            &tiny_graph(),
            4,
            &config(10),
            StageProgress::new(&progress, StageKind::ReducingClustering),
            &CancelToken::new(),
        )
        .unwrap();

        let reports = progress.reports();
        assert_eq!(reports.len(), 10);
        assert!((reports.last().unwrap().1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_coordinates_stay_finite() {
        let progress = NoopProgress;
        let coords = optimize_layout(
            &tiny_graph(),
            4,
            &config(500),
            StageProgress::new(&progress, StageKind::ReducingVisualization),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(coords.iter().flatten().all(|value| value.is_finite()));
    }

    #[test]
    fn test_curve_params_interpolate() {
        assert_eq!(curve_params(0.0), (1.93, 0.79));
        assert_eq!(curve_params(0.1), (1.577, 0.895));
        let (a, b) = curve_params(0.05);
        assert!(a < 1.93 && a > 1.577);
        assert!(b > 0.79 && b < 0.895);
        // Outside the anchor range: clamped.
        assert_eq!(curve_params(2.0), (0.58, 1.0));
    }
}
