//! Density-based clustering of the reduced layout.
//!
//! Operates only on the clustering-dimensional projection, never on raw
//! embeddings. [`density`] partitions points into labeled clusters with
//! membership probabilities; [`keywords`] names each non-noise cluster from
//! its member documents, independently of the clustering algorithm.

pub mod density;
pub mod keywords;

use serde::{Deserialize, Serialize};

use crate::error::{CartographError, Result};
use crate::util::{CancelToken, StageProgress};
use crate::vector::distance::DistanceMetric;

/// The sole reserved "no cluster" sentinel. Never reused as a real id.
pub const NOISE_LABEL: i32 = -1;

/// Configuration for one clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Smallest group that counts as a cluster.
    pub min_cluster_size: usize,
    /// Neighborhood size for core distances; defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,
    /// Distance metric over the reduced layout.
    pub metric: DistanceMetric,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// One named cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster id (non-negative; [`NOISE_LABEL`] never appears here).
    pub label: i32,
    /// Number of member points.
    pub member_count: usize,
    /// Score-annotated keywords, descending.
    pub keywords: Vec<(String, f32)>,
    /// Short visualization label.
    pub short_label: String,
}

/// Full clustering result: per-point labels and probabilities plus the
/// named clusters. Recomputed wholesale each run, never incrementally
/// merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clustering {
    /// Per-point cluster label; [`NOISE_LABEL`] marks outliers.
    pub labels: Vec<i32>,
    /// Per-point membership probability in `[0, 1]`.
    pub probabilities: Vec<f32>,
    /// Named non-noise clusters, ascending by label.
    pub clusters: Vec<Cluster>,
}

/// Cluster `points` and name each non-noise cluster from the member texts.
///
/// `points` and `member_texts` are parallel arrays over the same entities.
pub fn cluster_with_keywords(
    points: &[Vec<f32>],
    member_texts: &[String],
    config: &ClusterConfig,
    progress: StageProgress<'_>,
    cancel: &CancelToken,
) -> Result<Clustering> {
    if points.len() != member_texts.len() {
        return Err(CartographError::consistency(format!(
            "{} points but {} member texts",
            points.len(),
            member_texts.len()
        )));
    }

    let output = density::cluster(points, config, progress, cancel)?;

    let mut labels_present: Vec<i32> = output
        .labels
        .iter()
        .copied()
        .filter(|&label| label != NOISE_LABEL)
        .collect();
    labels_present.sort_unstable();
    labels_present.dedup();

    let mut clusters = Vec::with_capacity(labels_present.len());
    for label in labels_present {
        let members: Vec<&str> = output
            .labels
            .iter()
            .zip(member_texts)
            .filter(|&(&l, _)| l == label)
            .map(|(_, text)| text.as_str())
            .collect();
        let keywords = keywords::extract_keywords(&members);
        clusters.push(Cluster {
            label,
            member_count: members.len(),
            keywords: keywords.scored,
            short_label: keywords.short_label,
        });
    }

    Ok(Clustering {
        labels: output.labels,
        probabilities: output.probabilities,
        clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageKind;
    use crate::util::NoopProgress;

    fn two_blobs() -> (Vec<Vec<f32>>, Vec<String>) {
        let mut points = Vec::new();
        let mut texts = Vec::new();
        for i in 0..8 {
            points.push(vec![0.0 + (i as f32) * 0.01, 0.0]);
            texts.push("storage engine compaction throughput".to_string());
        }
        for i in 0..8 {
            points.push(vec![10.0 + (i as f32) * 0.01, 10.0]);
            texts.push("query planner optimizer statistics".to_string());
        }
        (points, texts)
    }

    #[test]
    fn test_clusters_are_named_from_member_texts() {
        let (points, texts) = two_blobs();
        let progress = NoopProgress;
        let clustering = cluster_with_keywords(
            &points,
            &texts,
            &ClusterConfig {
                min_cluster_size: 4,
                ..ClusterConfig::default()
            },
            StageProgress::new(&progress, StageKind::Clustering),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(clustering.clusters.len(), 2);
        let all_keywords: Vec<&str> = clustering
            .clusters
            .iter()
            .flat_map(|cluster| cluster.keywords.iter().map(|(term, _)| term.as_str()))
            .collect();
        assert!(all_keywords.contains(&"storage"));
        assert!(all_keywords.contains(&"planner"));
        for cluster in &clustering.clusters {
            assert!(cluster.label >= 0);
            assert!(!cluster.short_label.is_empty());
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let progress = NoopProgress;
        let result = cluster_with_keywords(
            &[vec![0.0]],
            &[],
            &ClusterConfig::default(),
            StageProgress::new(&progress, StageKind::Clustering),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(CartographError::Consistency(_))));
    }
}
