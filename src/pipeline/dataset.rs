//! The dataset aggregate and its derived snapshots.
//!
//! A [`Dataset`] owns every artifact derived from one document collection —
//! chunks, tiered vectors, both hybrid indices, projections, clustering,
//! and the processing summary — as one versioned unit. Datasets are
//! published as immutable snapshots: queries hold the snapshot they started
//! with, and a re-processing run replaces the published dataset atomically
//! instead of mutating it.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{Cluster, Clustering, NOISE_LABEL};
use crate::document::{Chunk, Document};
use crate::error::{CartographError, Result, StageKind};
use crate::hybrid::index::{HybridEntry, HybridIndex};

/// Everything derived from one processed document collection.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Dataset id, unique per processing run.
    pub id: String,
    /// Sanitized source documents, with derived cluster metadata merged in.
    pub documents: Vec<Document>,
    /// All chunks, in document order.
    pub chunks: Vec<Chunk>,
    /// Total chunk-to-parent map.
    pub chunk_to_parent: AHashMap<String, String>,
    /// Parent-tier vectors, parallel to `documents`.
    pub parent_vectors: Vec<Vec<f32>>,
    /// Chunk-tier vectors, parallel to `chunks`.
    pub chunk_vectors: Vec<Vec<f32>>,
    /// Document-tier hybrid index.
    pub document_index: HybridIndex,
    /// Chunk-tier hybrid index.
    pub chunk_index: HybridIndex,
    /// Clustering-dimensional projection, parallel to `documents`.
    pub projection_clustering: Vec<Vec<f32>>,
    /// 2-D projection, parallel to `documents`.
    pub projection_2d: Vec<Vec<f32>>,
    /// Density clustering over the clustering-dimensional projection.
    pub clustering: Clustering,
    /// What happened while processing, including degraded conditions.
    pub summary: ProcessingSummary,
    /// Embedding model identifier.
    pub model: String,
    /// Embedding dimensionality.
    pub dimension: usize,
}

impl Dataset {
    /// Verify cross-artifact invariants at a stage boundary.
    ///
    /// Checks that vector arrays parallel their owners, that every chunk's
    /// parent resolves to a document, and that projections and clustering
    /// arrays cover every document.
    pub fn verify_consistency(&self) -> Result<()> {
        if self.parent_vectors.len() != self.documents.len() {
            return Err(CartographError::consistency(format!(
                "{} parent vectors for {} documents",
                self.parent_vectors.len(),
                self.documents.len()
            )));
        }
        if self.chunk_vectors.len() != self.chunks.len() {
            return Err(CartographError::consistency(format!(
                "{} chunk vectors for {} chunks",
                self.chunk_vectors.len(),
                self.chunks.len()
            )));
        }

        let document_ids: ahash::AHashSet<&str> =
            self.documents.iter().map(|doc| doc.id.as_str()).collect();
        for chunk in &self.chunks {
            if !document_ids.contains(chunk.parent_id.as_str()) {
                return Err(CartographError::consistency(format!(
                    "chunk '{}' references missing document '{}'",
                    chunk.id, chunk.parent_id
                )));
            }
            if self.chunk_to_parent.get(&chunk.id) != Some(&chunk.parent_id) {
                return Err(CartographError::consistency(format!(
                    "chunk '{}' missing from the chunk-to-parent map",
                    chunk.id
                )));
            }
        }

        if !self.projection_2d.is_empty() && self.projection_2d.len() != self.documents.len() {
            return Err(CartographError::consistency(
                "2-D projection does not cover every document",
            ));
        }
        if !self.clustering.labels.is_empty()
            && self.clustering.labels.len() != self.documents.len()
        {
            return Err(CartographError::consistency(
                "cluster labels do not cover every document",
            ));
        }

        Ok(())
    }

    /// Read-only snapshot for the visualization layer.
    pub fn visualization_data(&self) -> VisualizationData {
        let short_labels: AHashMap<i32, &str> = self
            .clustering
            .clusters
            .iter()
            .map(|cluster| (cluster.label, cluster.short_label.as_str()))
            .collect();

        let points = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let (x, y) = match self.projection_2d.get(i) {
                    Some(point) if point.len() >= 2 => (point[0], point[1]),
                    _ => (0.0, 0.0),
                };
                let cluster = self
                    .clustering
                    .labels
                    .get(i)
                    .copied()
                    .unwrap_or(NOISE_LABEL);
                VisualizationPoint {
                    document_id: doc.id.clone(),
                    x,
                    y,
                    cluster,
                    probability: self.clustering.probabilities.get(i).copied().unwrap_or(0.0),
                    cluster_label: short_labels
                        .get(&cluster)
                        .map(|label| label.to_string())
                        .unwrap_or_default(),
                }
            })
            .collect();

        VisualizationData {
            points,
            clusters: self.clustering.clusters.clone(),
        }
    }
}

/// Build the document-tier hybrid index from parallel arrays.
pub fn build_document_index(
    documents: &[Document],
    vectors: &[Vec<f32>],
) -> Result<HybridIndex> {
    if documents.len() != vectors.len() {
        return Err(CartographError::consistency(format!(
            "{} documents but {} parent vectors",
            documents.len(),
            vectors.len()
        )));
    }
    let entries = documents
        .iter()
        .zip(vectors)
        .map(|(doc, vector)| HybridEntry {
            id: doc.id.clone(),
            text: doc.text.clone(),
            vector: vector.clone(),
            metadata: doc.metadata.clone(),
        })
        .collect();
    HybridIndex::build(entries)
}

/// Build the chunk-tier hybrid index from parallel arrays.
pub fn build_chunk_index(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<HybridIndex> {
    if chunks.len() != vectors.len() {
        return Err(CartographError::consistency(format!(
            "{} chunks but {} chunk vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    let entries = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| HybridEntry {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            vector: vector.clone(),
            metadata: chunk.metadata.clone(),
        })
        .collect();
    HybridIndex::build(entries)
}

/// What happened during one processing run. Degradable conditions (dropped
/// documents, applied fallbacks) always land here, never silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    /// Documents accepted for processing.
    pub ingested: usize,
    /// Documents dropped for empty text.
    pub dropped_empty: usize,
    /// Documents dropped as exact-text duplicates.
    pub dropped_duplicates: usize,
    /// Total chunks produced.
    pub chunk_count: usize,
    /// Non-noise clusters found.
    pub cluster_count: usize,
    /// Points labeled as noise.
    pub noise_count: usize,
    /// Human-readable record of every applied fallback.
    pub fallbacks: Vec<String>,
    /// Wall-clock per completed stage.
    pub stage_timings_ms: Vec<(StageKind, u64)>,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
}

impl ProcessingSummary {
    /// An empty summary stamped with the current time.
    pub fn new() -> Self {
        Self {
            ingested: 0,
            dropped_empty: 0,
            dropped_duplicates: 0,
            chunk_count: 0,
            cluster_count: 0,
            noise_count: 0,
            fallbacks: Vec::new(),
            stage_timings_ms: Vec::new(),
            completed_at: Utc::now(),
        }
    }
}

impl Default for ProcessingSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// One document's position in the 2-D map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationPoint {
    /// Owning document.
    pub document_id: String,
    /// 2-D coordinates.
    pub x: f32,
    /// 2-D coordinates.
    pub y: f32,
    /// Cluster label (−1 for noise).
    pub cluster: i32,
    /// Cluster membership probability.
    pub probability: f32,
    /// Short label of the cluster, empty for noise.
    pub cluster_label: String,
}

/// Read-only snapshot handed to the visualization layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationData {
    /// Per-document points.
    pub points: Vec<VisualizationPoint>,
    /// Named clusters.
    pub clusters: Vec<Cluster>,
}
