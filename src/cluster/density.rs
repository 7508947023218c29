//! Density-based partitioning of the reduced layout.
//!
//! The algorithm is the standard density-hierarchy construction: per-point
//! core distances, a minimum spanning tree over mutual reachability
//! distances, single-linkage hierarchy, condensation by minimum cluster
//! size, and stability-based (excess of mass) cluster selection. Membership
//! probability is the point's exit density relative to its cluster's maximum
//! density.
//!
//! The small-input policy is explicit: empty input yields empty outputs, and
//! input smaller than `min_cluster_size` yields all-noise labels with
//! probability 0 without invoking the algorithm at all.

use rayon::prelude::*;
use tracing::warn;

use crate::cluster::{ClusterConfig, NOISE_LABEL};
use crate::error::{CartographError, Result};
use crate::util::{CancelToken, StageProgress};
use crate::vector::distance::DistanceMetric;

/// Floor applied to merge distances before inversion into densities.
const DISTANCE_FLOOR: f32 = 1e-10;

/// Per-point labels and probabilities from one clustering run.
#[derive(Debug, Clone)]
pub struct DensityOutput {
    /// Per-point cluster label; [`NOISE_LABEL`] marks outliers.
    pub labels: Vec<i32>,
    /// Per-point membership probability in `[0, 1]`.
    pub probabilities: Vec<f32>,
}

/// Cluster `points` into density clusters.
pub fn cluster(
    points: &[Vec<f32>],
    config: &ClusterConfig,
    progress: StageProgress<'_>,
    cancel: &CancelToken,
) -> Result<DensityOutput> {
    let n = points.len();
    if n == 0 {
        return Ok(DensityOutput {
            labels: Vec::new(),
            probabilities: Vec::new(),
        });
    }

    let dimension = points[0].len();
    for point in points {
        if point.len() != dimension {
            return Err(CartographError::consistency(
                "clustering input has mixed dimensions",
            ));
        }
    }

    if n < config.min_cluster_size {
        return Ok(DensityOutput {
            labels: vec![NOISE_LABEL; n],
            probabilities: vec![0.0; n],
        });
    }

    let mcs = config.min_cluster_size.max(2);
    let min_samples = config.min_samples.unwrap_or(mcs).clamp(1, n - 1);

    let core = core_distances(points, min_samples, config.metric);
    progress.report(0.3);
    cancel.check("core distances")?;

    let mst = mutual_reachability_mst(points, &core, config.metric, progress, cancel)?;

    let dendrogram = single_linkage(&mst, n);
    let (labels, probabilities) = extract_clusters(&dendrogram, n, mcs);
    progress.report(1.0);

    let probabilities = probabilities.into_iter().map(Some).collect();
    let (labels, probabilities) = normalize_outputs(labels, probabilities, n);
    Ok(DensityOutput {
        labels,
        probabilities,
    })
}

/// Force labels and probabilities to the expected point count and value
/// ranges.
///
/// Length mismatches are corrected by truncation or noise-sentinel padding
/// with a warning. Missing probabilities default to 0.5 for noise points and
/// 1.0 for labeled points — a compatibility rule, not a statistical one —
/// and every probability is clamped to `[0, 1]`.
pub fn normalize_outputs(
    mut labels: Vec<i32>,
    probabilities: Vec<Option<f32>>,
    expected: usize,
) -> (Vec<i32>, Vec<f32>) {
    if labels.len() != expected {
        warn!(
            expected,
            actual = labels.len(),
            "label array length mismatch, correcting with the noise sentinel"
        );
        labels.resize(expected, NOISE_LABEL);
    }
    if probabilities.len() != expected {
        warn!(
            expected,
            actual = probabilities.len(),
            "probability array length mismatch, filling with defaults"
        );
    }

    let probabilities = (0..expected)
        .map(|i| {
            match probabilities.get(i).copied().flatten() {
                Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
                // Missing or non-finite: defaulting rule.
                _ => {
                    if labels[i] == NOISE_LABEL {
                        0.5
                    } else {
                        1.0
                    }
                }
            }
        })
        .collect();

    (labels, probabilities)
}

fn pair_distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    metric.distance(a, b).unwrap_or(f32::MAX)
}

/// Distance to each point's `min_samples`-th nearest neighbor.
fn core_distances(points: &[Vec<f32>], min_samples: usize, metric: DistanceMetric) -> Vec<f32> {
    points
        .par_iter()
        .enumerate()
        .map(|(i, point)| {
            let mut distances: Vec<f32> = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| pair_distance(metric, point, other))
                .collect();
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            distances[min_samples - 1]
        })
        .collect()
}

/// Prim MST over mutual reachability distances,
/// `max(core[a], core[b], d(a, b))`.
fn mutual_reachability_mst(
    points: &[Vec<f32>],
    core: &[f32],
    metric: DistanceMetric,
    progress: StageProgress<'_>,
    cancel: &CancelToken,
) -> Result<Vec<(u32, u32, f32)>> {
    let n = points.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f32::INFINITY; n];
    let mut parent = vec![0u32; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0usize;
    in_tree[0] = true;

    for step in 0..n - 1 {
        cancel.check("spanning tree construction")?;

        let row: Vec<f32> = points
            .par_iter()
            .map(|other| pair_distance(metric, &points[current], other))
            .collect();
        for j in 0..n {
            if !in_tree[j] {
                let reach = row[j].max(core[current]).max(core[j]);
                if reach < best[j] {
                    best[j] = reach;
                    parent[j] = current as u32;
                }
            }
        }

        let mut next = None;
        for j in 0..n {
            if !in_tree[j] && next.is_none_or(|k: usize| best[j] < best[k]) {
                next = Some(j);
            }
        }
        let next = next.ok_or_else(|| CartographError::other("spanning tree ran out of points"))?;

        in_tree[next] = true;
        edges.push((parent[next], next as u32, best[next]));
        current = next;

        if step % 64 == 0 {
            progress.report(0.3 + 0.4 * step as f32 / (n - 1) as f32);
        }
    }

    Ok(edges)
}

/// A merge node in the single-linkage dendrogram. Leaves are point indices
/// `0..n`; internal nodes are `n..2n-1`.
#[derive(Debug, Clone)]
struct DendroNode {
    left: usize,
    right: usize,
    distance: f32,
    size: usize,
}

fn single_linkage(mst: &[(u32, u32, f32)], n: usize) -> Vec<DendroNode> {
    let mut edges = mst.to_vec();
    edges.sort_by(|a, b| {
        a.2.partial_cmp(&b.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.0, a.1).cmp(&(b.0, b.1)))
    });

    let mut uf_parent: Vec<usize> = (0..n).collect();
    let mut node_of_root: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<DendroNode> = Vec::with_capacity(n.saturating_sub(1));

    fn find(uf_parent: &mut Vec<usize>, mut x: usize) -> usize {
        while uf_parent[x] != x {
            uf_parent[x] = uf_parent[uf_parent[x]];
            x = uf_parent[x];
        }
        x
    }

    for (a, b, distance) in edges {
        let ra = find(&mut uf_parent, a as usize);
        let rb = find(&mut uf_parent, b as usize);
        if ra == rb {
            continue;
        }

        let left = node_of_root[ra];
        let right = node_of_root[rb];
        let size = node_size(&nodes, n, left) + node_size(&nodes, n, right);
        let node_id = n + nodes.len();
        nodes.push(DendroNode {
            left,
            right,
            distance,
            size,
        });

        uf_parent[rb] = ra;
        node_of_root[ra] = node_id;
    }

    nodes
}

fn node_size(nodes: &[DendroNode], n: usize, id: usize) -> usize {
    if id < n { 1 } else { nodes[id - n].size }
}

fn collect_leaves(nodes: &[DendroNode], n: usize, id: usize, out: &mut Vec<u32>) {
    let mut stack = vec![id];
    while let Some(id) = stack.pop() {
        if id < n {
            out.push(id as u32);
        } else {
            let node = &nodes[id - n];
            stack.push(node.left);
            stack.push(node.right);
        }
    }
}

/// A cluster in the condensed tree.
#[derive(Debug, Clone, Default)]
struct Condensed {
    birth: f32,
    children: Vec<usize>,
    /// Points exiting this cluster, with the density at which they left.
    points: Vec<(u32, f32)>,
}

fn extract_clusters(nodes: &[DendroNode], n: usize, mcs: usize) -> (Vec<i32>, Vec<f32>) {
    let mut labels = vec![NOISE_LABEL; n];
    let mut probabilities = vec![0.0f32; n];
    if nodes.is_empty() {
        return (labels, probabilities);
    }

    let root = n + nodes.len() - 1;

    // Condense the dendrogram: splits where both sides reach `mcs` create
    // child clusters; smaller sides fall out as point exits.
    let mut condensed: Vec<Condensed> = vec![Condensed::default()];
    let mut stability = vec![0.0f32];
    let mut stack = vec![(root, 0usize)];

    while let Some((node_id, cid)) = stack.pop() {
        let node = &nodes[node_id - n];
        let lambda = 1.0 / node.distance.max(DISTANCE_FLOOR);
        let sides = [node.left, node.right];
        let sizes = [
            node_size(nodes, n, node.left),
            node_size(nodes, n, node.right),
        ];

        if sizes.iter().all(|&s| s >= mcs) {
            stability[cid] += node.size as f32 * (lambda - condensed[cid].birth);
            for &side in &sides {
                let child_cid = condensed.len();
                condensed.push(Condensed {
                    birth: lambda,
                    ..Condensed::default()
                });
                stability.push(0.0);
                condensed[cid].children.push(child_cid);
                stack.push((side, child_cid));
            }
        } else {
            for (&side, &size) in sides.iter().zip(&sizes) {
                if size >= mcs {
                    stack.push((side, cid));
                } else {
                    let mut exited = Vec::new();
                    collect_leaves(nodes, n, side, &mut exited);
                    let birth = condensed[cid].birth;
                    stability[cid] += exited.len() as f32 * (lambda - birth);
                    for point in exited {
                        condensed[cid].points.push((point, lambda));
                    }
                }
            }
        }
    }

    // Excess-of-mass selection, children before parents. The root is never
    // selected: a single all-encompassing cluster carries no information.
    let m = condensed.len();
    let mut selected = vec![false; m];
    let mut subtree_stability = vec![0.0f32; m];
    for cid in (0..m).rev() {
        if condensed[cid].children.is_empty() {
            selected[cid] = true;
            subtree_stability[cid] = stability[cid];
        } else {
            let child_sum: f32 = condensed[cid]
                .children
                .iter()
                .map(|&child| subtree_stability[child])
                .sum();
            if child_sum > stability[cid] {
                selected[cid] = false;
                subtree_stability[cid] = child_sum;
            } else {
                selected[cid] = true;
                subtree_stability[cid] = stability[cid];
            }
        }
    }
    selected[0] = false;

    // Claim top-down: the shallowest selected cluster owns its whole
    // subtree.
    let mut winners: Vec<usize> = Vec::new();
    let mut queue = vec![0usize];
    while let Some(cid) = queue.pop() {
        if selected[cid] {
            winners.push(cid);
        } else {
            queue.extend(condensed[cid].children.iter().copied());
        }
    }

    // Gather members per winner and order labels deterministically: larger
    // clusters first, ties by smallest member index.
    let mut members_by_winner: Vec<(usize, Vec<(u32, f32)>)> = winners
        .into_iter()
        .map(|cid| {
            let mut members = Vec::new();
            let mut sub = vec![cid];
            while let Some(c) = sub.pop() {
                members.extend(condensed[c].points.iter().copied());
                sub.extend(condensed[c].children.iter().copied());
            }
            members.sort_by_key(|&(point, _)| point);
            (cid, members)
        })
        .collect();
    members_by_winner.sort_by_key(|(_, members)| {
        (
            std::cmp::Reverse(members.len()),
            members.first().map(|&(point, _)| point).unwrap_or(u32::MAX),
        )
    });

    for (label, (_, members)) in members_by_winner.into_iter().enumerate() {
        let lambda_max = members
            .iter()
            .map(|&(_, lambda)| lambda)
            .fold(0.0f32, f32::max);
        for (point, lambda) in members {
            labels[point as usize] = label as i32;
            probabilities[point as usize] = if lambda_max > 0.0 {
                (lambda / lambda_max).clamp(0.0, 1.0)
            } else {
                1.0
            };
        }
    }

    (labels, probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageKind;
    use crate::util::NoopProgress;

    fn run(points: &[Vec<f32>], config: &ClusterConfig) -> DensityOutput {
        let progress = NoopProgress;
        cluster(
            points,
            config,
            StageProgress::new(&progress, StageKind::Clustering),
            &CancelToken::new(),
        )
        .unwrap()
    }

    fn blob(center: (f32, f32), count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| vec![center.0 + (i as f32) * 0.02, center.1 - (i as f32) * 0.01])
            .collect()
    }

    #[test]
    fn test_empty_input_yields_empty_outputs() {
        let output = run(&[], &ClusterConfig::default());
        assert!(output.labels.is_empty());
        assert!(output.probabilities.is_empty());
    }

    #[test]
    fn test_small_input_policy() {
        // len(points) < min_cluster_size: all noise, probability 0, without
        // running the algorithm.
        for min_cluster_size in [1usize, 5, 50] {
            for count in [0usize, 1, 4] {
                if count >= min_cluster_size {
                    continue;
                }
                let points: Vec<Vec<f32>> = (0..count).map(|i| vec![i as f32, 0.0]).collect();
                let output = run(
                    &points,
                    &ClusterConfig {
                        min_cluster_size,
                        ..ClusterConfig::default()
                    },
                );
                assert_eq!(output.labels, vec![NOISE_LABEL; count]);
                assert_eq!(output.probabilities, vec![0.0; count]);
            }
        }
    }

    #[test]
    fn test_four_points_below_threshold() {
        let points = blob((0.0, 0.0), 4);
        let output = run(&points, &ClusterConfig::default());
        assert_eq!(output.labels, vec![-1, -1, -1, -1]);
        assert_eq!(output.probabilities, vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_two_blobs_form_two_clusters() {
        let mut points = blob((0.0, 0.0), 10);
        points.extend(blob((50.0, 50.0), 10));

        let output = run(
            &points,
            &ClusterConfig {
                min_cluster_size: 5,
                ..ClusterConfig::default()
            },
        );

        let first: Vec<i32> = output.labels[..10].to_vec();
        let second: Vec<i32> = output.labels[10..].to_vec();
        assert!(first.iter().all(|&l| l == first[0] && l != NOISE_LABEL));
        assert!(second.iter().all(|&l| l == second[0] && l != NOISE_LABEL));
        assert_ne!(first[0], second[0]);

        for probability in &output.probabilities {
            assert!((0.0..=1.0).contains(probability));
        }
    }

    #[test]
    fn test_labels_are_deterministic() {
        let mut points = blob((0.0, 0.0), 12);
        points.extend(blob((30.0, 0.0), 7));
        let config = ClusterConfig {
            min_cluster_size: 5,
            ..ClusterConfig::default()
        };

        let first = run(&points, &config);
        let second = run(&points, &config);
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.probabilities, second.probabilities);
    }

    #[test]
    fn test_larger_cluster_gets_lower_label() {
        let mut points = blob((0.0, 0.0), 6);
        points.extend(blob((40.0, 0.0), 12));
        let output = run(
            &points,
            &ClusterConfig {
                min_cluster_size: 5,
                ..ClusterConfig::default()
            },
        );

        // The 12-member blob is cluster 0, the 6-member blob cluster 1.
        assert!(output.labels[10] == 0);
        assert!(output.labels[0] == 1);
    }

    #[test]
    fn test_distant_outlier_is_noise() {
        let mut points = blob((0.0, 0.0), 8);
        points.extend(blob((100.0, 100.0), 8));
        points.push(vec![5000.0, -5000.0]);

        let output = run(
            &points,
            &ClusterConfig {
                min_cluster_size: 5,
                ..ClusterConfig::default()
            },
        );
        assert_eq!(*output.labels.last().unwrap(), NOISE_LABEL);
        let last_probability = *output.probabilities.last().unwrap();
        assert!((0.0..=1.0).contains(&last_probability));
    }

    #[test]
    fn test_normalize_outputs_defaulting_rule() {
        let labels = vec![NOISE_LABEL, 0, 1];
        let probabilities = vec![None, None, Some(0.25)];
        let (labels, probabilities) = normalize_outputs(labels, probabilities, 3);

        assert_eq!(labels, vec![NOISE_LABEL, 0, 1]);
        assert_eq!(probabilities, vec![0.5, 1.0, 0.25]);
    }

    #[test]
    fn test_normalize_outputs_clamps_and_pads() {
        let labels = vec![0, 0];
        let probabilities = vec![Some(1.5), Some(-0.5), Some(0.9)];
        let (labels, probabilities) = normalize_outputs(labels, probabilities, 4);

        assert_eq!(labels, vec![0, 0, NOISE_LABEL, NOISE_LABEL]);
        assert_eq!(probabilities, vec![1.0, 0.0, 0.9, 0.5]);
    }

    #[test]
    fn test_normalize_outputs_truncates_long_arrays() {
        let labels = vec![0, 1, 2, 3];
        let probabilities = vec![Some(0.1); 4];
        let (labels, probabilities) = normalize_outputs(labels, probabilities, 2);
        assert_eq!(labels.len(), 2);
        assert_eq!(probabilities.len(), 2);
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn test_non_finite_probability_falls_back_to_default() {
        let labels = vec![0, NOISE_LABEL];
        let probabilities = vec![Some(f32::NAN), Some(f32::INFINITY)];
        let (_, probabilities) = normalize_outputs(labels, probabilities, 2);
        assert_eq!(probabilities, vec![1.0, 0.5]);
    }
}
