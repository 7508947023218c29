//! Neighbor graph construction for the reducer.
//!
//! Below [`EXACT_KNN_LIMIT`] points the graph is exact (all pairs, rayon).
//! Above it, a random-projection-tree forest produces candidate pools that a
//! fixed number of neighbor-of-neighbor passes refine — approximation is
//! confined to this phase of the pipeline.

use ahash::{AHashMap, AHashSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::Result;
use crate::vector::distance::DistanceMetric;

/// Largest input for which all-pairs search is used.
pub const EXACT_KNN_LIMIT: usize = 4096;

/// Trees in the random-projection forest.
const RP_TREE_COUNT: usize = 4;

/// Refinement passes over neighbors-of-neighbors.
const REFINE_PASSES: usize = 2;

/// Iterations of the per-point bandwidth search.
const SMOOTH_ITERATIONS: usize = 64;

/// k-nearest neighbors per point: `(neighbor index, distance)` sorted by
/// ascending distance.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    /// Per-point neighbor lists.
    pub neighbors: Vec<Vec<(u32, f32)>>,
}

/// A symmetrized, weighted neighbor edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyEdge {
    /// One endpoint.
    pub head: u32,
    /// The other endpoint.
    pub tail: u32,
    /// Membership strength in `(0, 1]`.
    pub weight: f32,
}

/// The symmetrized fuzzy neighbor graph consumed by the layout optimizer.
#[derive(Debug, Clone)]
pub struct FuzzyGraph {
    /// Edges sorted by `(head, tail)` for deterministic iteration.
    pub edges: Vec<FuzzyEdge>,
}

/// Build the k-NN graph, exact or approximate depending on input size.
pub fn build_knn_graph(
    data: &[Vec<f32>],
    k: usize,
    metric: DistanceMetric,
    seed: u64,
) -> Result<NeighborGraph> {
    if data.len() <= EXACT_KNN_LIMIT {
        Ok(exact_knn(data, k, metric))
    } else {
        Ok(approximate_knn(data, k, metric, seed))
    }
}

fn pair_distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    // Dimensions are validated before graph construction.
    metric.distance(a, b).unwrap_or(f32::MAX)
}

fn exact_knn(data: &[Vec<f32>], k: usize, metric: DistanceMetric) -> NeighborGraph {
    let neighbors = (0..data.len())
        .into_par_iter()
        .map(|i| {
            let mut distances: Vec<(u32, f32)> = data
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, other)| (j as u32, pair_distance(metric, &data[i], other)))
                .collect();
            distances.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            distances.truncate(k);
            distances
        })
        .collect();

    NeighborGraph { neighbors }
}

fn approximate_knn(
    data: &[Vec<f32>],
    k: usize,
    metric: DistanceMetric,
    seed: u64,
) -> NeighborGraph {
    let n = data.len();
    let leaf_size = (k * 2).max(32);
    let mut rng = StdRng::seed_from_u64(seed);

    // Forest pass: points sharing a leaf become mutual candidates.
    let mut candidates: Vec<AHashSet<u32>> = vec![AHashSet::new(); n];
    for _ in 0..RP_TREE_COUNT {
        let indices: Vec<u32> = (0..n as u32).collect();
        let mut leaves = Vec::new();
        split_into_leaves(data, metric, indices, leaf_size, &mut rng, 0, &mut leaves);
        for leaf in leaves {
            for &i in &leaf {
                for &j in &leaf {
                    if i != j {
                        candidates[i as usize].insert(j);
                    }
                }
            }
        }
    }

    // Top up sparse pools with random candidates so every point has at
    // least k.
    for (i, pool) in candidates.iter_mut().enumerate() {
        while pool.len() < k {
            let j = rng.random_range(0..n as u32);
            if j as usize != i {
                pool.insert(j);
            }
        }
    }

    let mut graph = NeighborGraph {
        neighbors: select_best(data, k, metric, &candidates),
    };

    // Neighbor-of-neighbor refinement.
    for _ in 0..REFINE_PASSES {
        let previous = &graph;
        let pools: Vec<AHashSet<u32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut pool: AHashSet<u32> = AHashSet::new();
                for &(j, _) in &previous.neighbors[i] {
                    pool.insert(j);
                    for &(j2, _) in &previous.neighbors[j as usize] {
                        if j2 as usize != i {
                            pool.insert(j2);
                        }
                    }
                }
                pool
            })
            .collect();
        graph = NeighborGraph {
            neighbors: select_best(data, k, metric, &pools),
        };
    }

    graph
}

fn select_best(
    data: &[Vec<f32>],
    k: usize,
    metric: DistanceMetric,
    pools: &[AHashSet<u32>],
) -> Vec<Vec<(u32, f32)>> {
    pools
        .par_iter()
        .enumerate()
        .map(|(i, pool)| {
            let mut distances: Vec<(u32, f32)> = pool
                .iter()
                .map(|&j| (j, pair_distance(metric, &data[i], &data[j as usize])))
                .collect();
            distances.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            distances.truncate(k);
            distances
        })
        .collect()
}

fn split_into_leaves(
    data: &[Vec<f32>],
    metric: DistanceMetric,
    indices: Vec<u32>,
    leaf_size: usize,
    rng: &mut StdRng,
    depth: usize,
    leaves: &mut Vec<Vec<u32>>,
) {
    // Depth cap keeps pathological (all-identical) data from recursing
    // forever.
    if indices.len() <= leaf_size || depth > 32 {
        leaves.push(indices);
        return;
    }

    let a = indices[rng.random_range(0..indices.len())] as usize;
    let b = indices[rng.random_range(0..indices.len())] as usize;

    let (mut left, mut right): (Vec<u32>, Vec<u32>) = indices.iter().copied().partition(|&i| {
        pair_distance(metric, &data[i as usize], &data[a])
            <= pair_distance(metric, &data[i as usize], &data[b])
    });

    // Degenerate pivots: fall back to an arbitrary even split.
    if left.is_empty() || right.is_empty() {
        let mut all = if left.is_empty() { right } else { left };
        let half = all.len() / 2;
        right = all.split_off(half);
        left = all;
    }

    split_into_leaves(data, metric, left, leaf_size, rng, depth + 1, leaves);
    split_into_leaves(data, metric, right, leaf_size, rng, depth + 1, leaves);
}

/// Convert a k-NN graph into a symmetrized fuzzy graph.
///
/// Per point, distances are smoothed so the nearest neighbor gets weight 1
/// and weights decay with a bandwidth calibrated to `log2(n_neighbors)`;
/// directed weights are then combined by fuzzy union
/// (`w = a + b − a·b`).
pub fn fuzzy_graph(knn: &NeighborGraph, n_neighbors: usize) -> FuzzyGraph {
    let target = (n_neighbors.max(2) as f32).log2();

    let mut directed: AHashMap<(u32, u32), f32> = AHashMap::new();
    for (i, neighbors) in knn.neighbors.iter().enumerate() {
        if neighbors.is_empty() {
            continue;
        }
        let rho = neighbors
            .iter()
            .map(|&(_, d)| d)
            .find(|&d| d > 0.0)
            .unwrap_or(0.0);
        let sigma = smooth_bandwidth(neighbors, rho, target);

        for &(j, distance) in neighbors {
            let weight = if sigma > 0.0 {
                (-((distance - rho).max(0.0)) / sigma).exp()
            } else {
                1.0
            };
            directed.insert((i as u32, j), weight);
        }
    }

    let mut combined: AHashMap<(u32, u32), f32> = AHashMap::new();
    for (&(i, j), &weight) in &directed {
        let key = (i.min(j), i.max(j));
        let reverse = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let fused = weight + reverse - weight * reverse;
        combined.insert(key, fused);
    }

    let mut edges: Vec<FuzzyEdge> = combined
        .into_iter()
        .map(|((head, tail), weight)| FuzzyEdge { head, tail, weight })
        .collect();
    edges.sort_by_key(|edge| (edge.head, edge.tail));

    FuzzyGraph { edges }
}

fn smooth_bandwidth(neighbors: &[(u32, f32)], rho: f32, target: f32) -> f32 {
    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..SMOOTH_ITERATIONS {
        let sum: f32 = neighbors
            .iter()
            .map(|&(_, d)| (-((d - rho).max(0.0)) / mid).exp())
            .sum();

        if (sum - target).abs() < 1e-5 {
            break;
        }
        if sum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    mid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, (i * 7 % 13) as f32]).collect()
    }

    #[test]
    fn test_exact_knn_finds_true_neighbors() {
        let data = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
        ];
        let graph = exact_knn(&data, 1, DistanceMetric::Euclidean);

        assert_eq!(graph.neighbors[0][0].0, 1);
        assert_eq!(graph.neighbors[1][0].0, 0);
        assert_eq!(graph.neighbors[2][0].0, 3);
        assert_eq!(graph.neighbors[3][0].0, 2);
    }

    #[test]
    fn test_approximate_knn_recovers_most_true_neighbors() {
        let data = grid_points(600);
        let k = 5;
        let exact = exact_knn(&data, k, DistanceMetric::Euclidean);
        let approx = approximate_knn(&data, k, DistanceMetric::Euclidean, 7);

        let mut overlap = 0usize;
        let mut total = 0usize;
        for (exact_list, approx_list) in exact.neighbors.iter().zip(&approx.neighbors) {
            let truth: AHashSet<u32> = exact_list.iter().map(|&(j, _)| j).collect();
            overlap += approx_list.iter().filter(|(j, _)| truth.contains(j)).count();
            total += exact_list.len();
        }

        // Recall is approximate by construction; demand a clear majority.
        assert!(overlap as f32 / total as f32 > 0.6);
    }

    #[test]
    fn test_every_point_has_k_neighbors() {
        let data = grid_points(50);
        let graph = build_knn_graph(&data, 5, DistanceMetric::Euclidean, 1).unwrap();
        assert!(graph.neighbors.iter().all(|list| list.len() == 5));
    }

    #[test]
    fn test_fuzzy_graph_weights_and_determinism() {
        let data = grid_points(30);
        let graph = build_knn_graph(&data, 4, DistanceMetric::Euclidean, 1).unwrap();

        let first = fuzzy_graph(&graph, 4);
        let second = fuzzy_graph(&graph, 4);
        assert_eq!(first.edges, second.edges);

        for edge in &first.edges {
            assert!(edge.weight > 0.0 && edge.weight <= 1.0 + 1e-6);
            assert!(edge.head < edge.tail);
        }
    }

    #[test]
    fn test_nearest_neighbor_gets_full_weight() {
        let data = vec![vec![0.0], vec![1.0], vec![3.0], vec![10.0]];
        let graph = exact_knn(&data, 2, DistanceMetric::Euclidean);
        let fuzzy = fuzzy_graph(&graph, 2);

        // Point 0's nearest neighbor is 1; the directed weight at rho is 1,
        // and fuzzy union can only increase it.
        let edge = fuzzy
            .edges
            .iter()
            .find(|edge| edge.head == 0 && edge.tail == 1)
            .unwrap();
        assert!(edge.weight > 0.99);
    }
}
