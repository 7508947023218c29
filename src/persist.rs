//! Versioned dataset export and import.
//!
//! The export payload carries documents, chunks, both embedding tiers, the
//! chunk-to-parent map, and the visualization artifacts as JSON. It never
//! carries a serialized index: import rebuilds both hybrid indices from the
//! raw vectors, so a payload can never smuggle in an index that disagrees
//! with its own data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::density::normalize_outputs;
use crate::cluster::{Cluster, Clustering, NOISE_LABEL};
use crate::document::{Chunk, Document, Metadata};
use crate::embedding::EmbeddingMode;
use crate::error::{CartographError, Result};
use crate::pipeline::dataset::{
    Dataset, ProcessingSummary, build_chunk_index, build_document_index,
};

/// Current export format version.
pub const EXPORT_VERSION: u32 = 1;

/// Blob-store namespace for dataset payloads.
pub const DATASET_NAMESPACE: &str = "datasets";

/// Export payload header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Format version.
    pub version: u32,
    /// Embedding model identifier.
    pub model: String,
    /// Embedding dimensionality.
    pub dimension: usize,
    /// Union of document metadata keys.
    pub schema: Vec<String>,
    /// Export timestamp.
    pub exported_at: DateTime<Utc>,
}

/// One embedding tier: vectors parallel to their owner array, plus the mode
/// they were encoded with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTier {
    /// Vectors in owner order.
    pub vectors: Vec<Vec<f32>>,
    /// Encoding mode of this tier.
    pub mode: EmbeddingMode,
}

/// Both embedding tiers and the chunk-to-parent map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEmbeddings {
    /// Parent-tier vectors, parallel to `documents`.
    pub parent: ExportTier,
    /// Chunk-tier vectors, parallel to `chunks`.
    pub chunks: ExportTier,
    /// Chunk id to parent document id.
    pub chunk_map: BTreeMap<String, String>,
}

/// A chunk as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportChunk {
    /// Chunk id.
    pub chunk_id: String,
    /// Parent document id.
    pub parent_id: String,
    /// Passage text.
    pub text: String,
    /// Ordinal within the parent.
    pub position: usize,
    /// Chunk metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Visualization artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportVisualization {
    /// 2-D projection, parallel to `documents`.
    pub projection_2d: Vec<Vec<f32>>,
    /// Named clusters.
    pub clusters: Vec<Cluster>,
}

/// The complete versioned export payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetExport {
    /// Header.
    pub metadata: ExportMetadata,
    /// Documents with their (derived) metadata.
    pub documents: Vec<Document>,
    /// Embedding tiers.
    pub embeddings: ExportEmbeddings,
    /// Chunks.
    pub chunks: Vec<ExportChunk>,
    /// Visualization artifacts, if clustering ran.
    pub visualization: Option<ExportVisualization>,
}

/// Build the export payload for a dataset.
pub fn export_dataset(dataset: &Dataset) -> DatasetExport {
    let mut schema: Vec<String> = dataset
        .documents
        .iter()
        .flat_map(|doc| doc.metadata.keys().cloned())
        .collect();
    schema.sort();
    schema.dedup();

    DatasetExport {
        metadata: ExportMetadata {
            version: EXPORT_VERSION,
            model: dataset.model.clone(),
            dimension: dataset.dimension,
            schema,
            exported_at: Utc::now(),
        },
        documents: dataset.documents.clone(),
        embeddings: ExportEmbeddings {
            parent: ExportTier {
                vectors: dataset.parent_vectors.clone(),
                mode: EmbeddingMode::Query,
            },
            chunks: ExportTier {
                vectors: dataset.chunk_vectors.clone(),
                mode: EmbeddingMode::Passage,
            },
            chunk_map: dataset
                .chunk_to_parent
                .iter()
                .map(|(chunk, parent)| (chunk.clone(), parent.clone()))
                .collect(),
        },
        chunks: dataset
            .chunks
            .iter()
            .map(|chunk| ExportChunk {
                chunk_id: chunk.id.clone(),
                parent_id: chunk.parent_id.clone(),
                text: chunk.text.clone(),
                position: chunk.position,
                metadata: chunk.metadata.clone(),
            })
            .collect(),
        visualization: Some(ExportVisualization {
            projection_2d: dataset.projection_2d.clone(),
            clusters: dataset.clustering.clusters.clone(),
        }),
    }
}

/// Serialize a dataset to the versioned JSON payload.
pub fn export_json(dataset: &Dataset) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&export_dataset(dataset))?)
}

/// Import a dataset from a JSON payload.
///
/// Rejects payloads missing the `metadata`, `documents`, or `embeddings`
/// sections, verifies the format version, and rebuilds both hybrid indices
/// from the stored vectors.
pub fn import_json(bytes: &[u8]) -> Result<Dataset> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    for section in ["metadata", "documents", "embeddings"] {
        if value.get(section).is_none() {
            return Err(CartographError::input_validation(format!(
                "import payload is missing the '{section}' section"
            )));
        }
    }

    let export: DatasetExport = serde_json::from_value(value)?;
    if export.metadata.version != EXPORT_VERSION {
        return Err(CartographError::input_validation(format!(
            "unsupported export version {} (expected {EXPORT_VERSION})",
            export.metadata.version
        )));
    }

    import_export(export)
}

fn import_export(export: DatasetExport) -> Result<Dataset> {
    let documents = export.documents;
    let parent_vectors = export.embeddings.parent.vectors;
    if parent_vectors.len() != documents.len() {
        return Err(CartographError::consistency(format!(
            "{} parent vectors for {} documents",
            parent_vectors.len(),
            documents.len()
        )));
    }
    if let Some(vector) = parent_vectors.first() {
        if vector.len() != export.metadata.dimension {
            return Err(CartographError::consistency(format!(
                "stored dimension {} disagrees with metadata dimension {}",
                vector.len(),
                export.metadata.dimension
            )));
        }
    }

    let chunks: Vec<Chunk> = export
        .chunks
        .into_iter()
        .map(|chunk| Chunk {
            id: chunk.chunk_id,
            parent_id: chunk.parent_id,
            position: chunk.position,
            text: chunk.text,
            metadata: chunk.metadata,
        })
        .collect();
    let chunk_vectors = export.embeddings.chunks.vectors;
    if chunk_vectors.len() != chunks.len() {
        return Err(CartographError::consistency(format!(
            "{} chunk vectors for {} chunks",
            chunk_vectors.len(),
            chunks.len()
        )));
    }

    let chunk_to_parent: ahash::AHashMap<String, String> =
        export.embeddings.chunk_map.into_iter().collect();
    for chunk in &chunks {
        match chunk_to_parent.get(&chunk.id) {
            Some(parent) if *parent == chunk.parent_id => {}
            Some(parent) => {
                return Err(CartographError::consistency(format!(
                    "chunk map says '{}' belongs to '{parent}', chunk says '{}'",
                    chunk.id, chunk.parent_id
                )));
            }
            None => {
                return Err(CartographError::consistency(format!(
                    "chunk '{}' is missing from the chunk map",
                    chunk.id
                )));
            }
        }
    }

    // Indices are always rebuilt from the raw vectors.
    let document_index = build_document_index(&documents, &parent_vectors)?;
    let chunk_index = build_chunk_index(&chunks, &chunk_vectors)?;

    // Per-point labels and probabilities live on the documents; the
    // documented defaulting rule fills anything the payload left out.
    let labels: Vec<i32> = documents
        .iter()
        .map(|doc| {
            doc.metadata
                .get("cluster")
                .and_then(|value| value.as_f64())
                .map(|label| label as i32)
                .unwrap_or(NOISE_LABEL)
        })
        .collect();
    let probabilities: Vec<Option<f32>> = documents
        .iter()
        .map(|doc| {
            doc.metadata
                .get("cluster_probability")
                .and_then(|value| value.as_f64())
                .map(|probability| probability as f32)
        })
        .collect();
    let (labels, probabilities) = normalize_outputs(labels, probabilities, documents.len());

    let (projection_2d, clusters) = match export.visualization {
        Some(visualization) => (visualization.projection_2d, visualization.clusters),
        None => (Vec::new(), Vec::<Cluster>::new()),
    };

    let mut summary = ProcessingSummary::new();
    summary.ingested = documents.len();
    summary.chunk_count = chunks.len();
    summary.cluster_count = clusters.len();
    summary.noise_count = labels.iter().filter(|&&label| label == NOISE_LABEL).count();
    summary
        .fallbacks
        .push("restored from export payload; indices rebuilt from vectors".to_string());

    let dataset = Dataset {
        id: uuid::Uuid::new_v4().to_string(),
        documents,
        chunks,
        chunk_to_parent,
        parent_vectors,
        chunk_vectors,
        document_index,
        chunk_index,
        projection_clustering: Vec::new(),
        projection_2d,
        clustering: Clustering {
            labels,
            probabilities,
            clusters,
        },
        summary,
        model: export.metadata.model,
        dimension: export.metadata.dimension,
    };
    dataset.verify_consistency()?;

    info!(
        documents = dataset.documents.len(),
        chunks = dataset.chunks.len(),
        "dataset imported"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_rejected() {
        let payload = serde_json::json!({
            "metadata": { "version": 1, "model": "m", "dimension": 2,
                          "schema": [], "exported_at": "2026-01-01T00:00:00Z" },
            "documents": [],
        });
        let err = import_json(payload.to_string().as_bytes()).unwrap_err();
        match err {
            CartographError::InputValidation(message) => {
                assert!(message.contains("embeddings"));
            }
            other => panic!("expected InputValidation, got {other}"),
        }
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let payload = serde_json::json!({
            "metadata": { "version": 99, "model": "m", "dimension": 2,
                          "schema": [], "exported_at": "2026-01-01T00:00:00Z" },
            "documents": [],
            "embeddings": {
                "parent": { "vectors": [], "mode": "query" },
                "chunks": { "vectors": [], "mode": "passage" },
                "chunk_map": {}
            },
            "chunks": [],
            "visualization": null
        });
        assert!(import_json(payload.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_dangling_chunk_parent_rejected() {
        let payload = serde_json::json!({
            "metadata": { "version": 1, "model": "m", "dimension": 2,
                          "schema": [], "exported_at": "2026-01-01T00:00:00Z" },
            "documents": [
                { "id": "d1", "text": "some document text", "metadata": {} }
            ],
            "embeddings": {
                "parent": { "vectors": [[1.0, 0.0]], "mode": "query" },
                "chunks": { "vectors": [[0.0, 1.0]], "mode": "passage" },
                "chunk_map": { "ghost_chunk_0": "ghost" }
            },
            "chunks": [
                { "chunk_id": "ghost_chunk_0", "parent_id": "ghost",
                  "text": "orphaned", "position": 0, "metadata": {} }
            ],
            "visualization": null
        });
        let err = import_json(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CartographError::Consistency(_)));
    }
}
