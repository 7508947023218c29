use std::sync::Arc;

use cartograph::document::Document;
use cartograph::embedding::hashing::HashingEmbedder;
use cartograph::error::Result;
use cartograph::generation::ScriptedGenerator;
use cartograph::persist::{self, DATASET_NAMESPACE, EXPORT_VERSION};
use cartograph::pipeline::orchestrator::{Pipeline, SearchOptions};
use cartograph::storage::{BlobStore, FileBlobStore, MemoryBlobStore, artifact_key};
use cartograph::util::{CancelToken, NoopProgress};

fn topic_doc(topic: &str, variant: usize) -> String {
    (0..100)
        .map(|i| format!("{topic}{}", (variant * 7 + i) % 60))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn processed_dataset(
    store: Arc<dyn BlobStore>,
) -> Result<(Pipeline, Arc<cartograph::pipeline::dataset::Dataset>)> {
    let pipeline = Pipeline::new(
        Arc::new(HashingEmbedder::new(64)?),
        Arc::new(ScriptedGenerator::fixed("ok")),
        store,
    );
    let dataset = pipeline
        .process_dataset(
            vec![
                Document::new("alpha", topic_doc("alpha", 0)),
                Document::new("beta", topic_doc("beta", 0)),
                Document::new("gamma", topic_doc("gamma", 0)),
            ],
            Arc::new(NoopProgress),
            CancelToken::new(),
        )
        .await?;
    Ok((pipeline, dataset))
}

#[tokio::test]
async fn test_export_import_round_trip_rebuilds_indices() -> Result<()> {
    let (_pipeline, dataset) = processed_dataset(Arc::new(MemoryBlobStore::new())).await?;

    let payload = persist::export_json(&dataset)?;
    let imported = persist::import_json(&payload)?;

    assert_eq!(imported.documents.len(), dataset.documents.len());
    assert_eq!(imported.chunks.len(), dataset.chunks.len());
    assert_eq!(imported.dimension, dataset.dimension);
    assert_eq!(imported.model, "hashing-v1");
    assert_eq!(imported.projection_2d.len(), dataset.projection_2d.len());

    // The rebuilt indices answer queries exactly like the originals: same
    // stored vectors, same texts, freshly built sides.
    let original_hits = dataset.document_index.lexical_search("alpha5", 5)?;
    let imported_hits = imported.document_index.lexical_search("alpha5", 5)?;
    assert_eq!(original_hits.len(), imported_hits.len());
    for (a, b) in original_hits.iter().zip(&imported_hits) {
        assert_eq!(a.id, b.id);
        assert!((a.score - b.score).abs() < 1e-5);
    }

    let query = dataset.parent_vectors[0].clone();
    let original_hits = dataset.document_index.vector_search(&query, 3, f32::MIN)?;
    let imported_hits = imported.document_index.vector_search(&query, 3, f32::MIN)?;
    for (a, b) in original_hits.iter().zip(&imported_hits) {
        assert_eq!(a.id, b.id);
        assert!((a.score - b.score).abs() < 1e-5);
    }

    // Cluster assignments survive the trip through document metadata.
    assert_eq!(imported.clustering.labels, dataset.clustering.labels);

    Ok(())
}

#[tokio::test]
async fn test_export_payload_shape() -> Result<()> {
    let (_pipeline, dataset) = processed_dataset(Arc::new(MemoryBlobStore::new())).await?;

    let payload = persist::export_json(&dataset)?;
    let value: serde_json::Value = serde_json::from_slice(&payload)?;

    assert_eq!(value["metadata"]["version"], EXPORT_VERSION);
    assert_eq!(value["metadata"]["model"], "hashing-v1");
    assert_eq!(value["metadata"]["dimension"], 64);
    assert!(value["metadata"]["schema"].is_array());

    assert_eq!(value["documents"].as_array().unwrap().len(), 3);
    assert_eq!(
        value["embeddings"]["parent"]["vectors"].as_array().unwrap().len(),
        3
    );
    assert_eq!(value["embeddings"]["parent"]["mode"], "query");
    assert_eq!(value["embeddings"]["chunks"]["mode"], "passage");
    assert!(value["embeddings"]["chunk_map"].is_object());

    let chunks = value["chunks"].as_array().unwrap();
    assert_eq!(
        chunks.len(),
        value["embeddings"]["chunks"]["vectors"].as_array().unwrap().len()
    );
    for chunk in chunks {
        assert!(chunk["chunk_id"].is_string());
        assert!(chunk["parent_id"].is_string());
        assert!(chunk["position"].is_number());
    }

    assert!(value["visualization"]["projection_2d"].is_array());
    Ok(())
}

#[tokio::test]
async fn test_saved_blob_is_importable() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileBlobStore::new(dir.path())?);
    let (_pipeline, dataset) = processed_dataset(store.clone()).await?;

    // The pipeline saved through the blob store under the dataset key; that
    // blob alone is enough to reconstruct a queryable dataset.
    let blob = store
        .get(&artifact_key(DATASET_NAMESPACE, &dataset.id))?
        .expect("saved dataset blob");
    let imported = persist::import_json(&blob)?;

    let hits = imported.document_index.lexical_search("beta5", 3)?;
    assert_eq!(hits[0].id, "beta");
    Ok(())
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() -> Result<()> {
    let (_pipeline, dataset) = processed_dataset(Arc::new(MemoryBlobStore::new())).await?;
    let payload = persist::export_json(&dataset)?;
    let mut value: serde_json::Value = serde_json::from_slice(&payload)?;

    // Dropping a required section must fail import.
    value.as_object_mut().unwrap().remove("embeddings");
    assert!(persist::import_json(value.to_string().as_bytes()).is_err());

    // A vector-count mismatch must fail import, not silently misalign.
    let mut value: serde_json::Value = serde_json::from_slice(&payload)?;
    value["embeddings"]["parent"]["vectors"]
        .as_array_mut()
        .unwrap()
        .pop();
    assert!(persist::import_json(value.to_string().as_bytes()).is_err());

    Ok(())
}

#[test]
fn test_search_options_defaults() {
    // Lexical is the default retrieval mode for document search.
    let options = SearchOptions::default();
    assert_eq!(options.k, 10);
    assert!(matches!(
        options.mode,
        cartograph::pipeline::orchestrator::SearchMode::Lexical
    ));
}
