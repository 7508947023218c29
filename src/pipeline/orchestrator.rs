//! The pipeline orchestrator.
//!
//! Drives a document collection through the staged pipeline
//! (`Empty → Chunking → EmbeddingParent → EmbeddingChunk → Indexing →
//! ReducingClustering → ReducingVisualization → Clustering → Saved`) and
//! serves queries over the published dataset. Stages run strictly in
//! sequence; any stage failure aborts the whole run with a stage-tagged
//! error and no partial dataset is ever published. Long stages run on
//! blocking threads, report progress fractions, and poll the cancel token
//! at interior checkpoints.
//!
//! Completed datasets are published as immutable [`Arc`] snapshots swapped
//! atomically: queries keep the snapshot they started with, so a
//! re-processing run can never mutate artifacts an in-flight query reads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::chunking::{ChunkConfig, Chunker};
use crate::cluster::{self, ClusterConfig, NOISE_LABEL};
use crate::document::{Document, MetadataValue};
use crate::embedding::EmbeddingMode;
use crate::embedding::client::EmbeddingClient;
use crate::embedding::embedder::TextEmbedder;
use crate::error::{CartographError, Result, StageKind};
use crate::generation::{GenerationOptions, TextGenerator, TokenStream};
use crate::hybrid::fusion::{FusionStrategy, fuse};
use crate::persist;
use crate::pipeline::dataset::{
    Dataset, ProcessingSummary, VisualizationData, build_chunk_index, build_document_index,
};
use crate::reduce::{self, ReduceConfig};
use crate::storage::{BlobStore, artifact_key};
use crate::util::{CancelToken, ProgressSink, StageProgress};

/// Where a dataset stands in the processing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetState {
    /// No dataset processed yet.
    Empty,
    /// A stage is running.
    Running(StageKind),
    /// The last run completed and was published.
    Saved,
}

/// Degradable conditions the orchestrator may encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    /// A document arrived with empty text.
    EmptyDocument,
    /// A document's text duplicates an earlier one.
    DuplicateDocument,
    /// The reducer was configured with more neighbors than points exist.
    NeighborsExceedPointCount,
    /// The chunk size exceeds the embedding model's effective budget.
    ChunkExceedsModelBudget,
}

/// What to do when a degradable condition occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// Drop the offending item and record it in the summary.
    DropAndReport,
    /// Clamp the offending parameter and record it in the summary.
    ClampAndReport,
    /// Keep going, but record the condition in the summary.
    WarnAndReport,
}

/// The fallback-policy table.
///
/// Centralizes degradation decisions in one place, keyed by failure kind,
/// instead of scattering heuristics through leaf routines. Every applied
/// fallback lands in the run's [`ProcessingSummary`].
#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy;

impl FallbackPolicy {
    /// The action for a degradable condition.
    pub fn action(&self, kind: FallbackKind) -> FallbackAction {
        match kind {
            FallbackKind::EmptyDocument => FallbackAction::DropAndReport,
            FallbackKind::DuplicateDocument => FallbackAction::DropAndReport,
            FallbackKind::NeighborsExceedPointCount => FallbackAction::ClampAndReport,
            FallbackKind::ChunkExceedsModelBudget => FallbackAction::WarnAndReport,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunker settings.
    pub chunking: ChunkConfig,
    /// Token budget for the parent/clustering tier; gist matters more than
    /// completeness there.
    pub parent_max_length: usize,
    /// Token budget for the chunk tier; 0 means no truncation, since chunks
    /// are already size-bounded.
    pub chunk_max_length: usize,
    /// Reduction settings for the clustering-dimensional run.
    pub reduce_clustering: ReduceConfig,
    /// Reduction settings for the 2-D run.
    pub reduce_visualization: ReduceConfig,
    /// Density clustering settings.
    pub cluster: ClusterConfig,
    /// Fusion strategy for question answering.
    pub fusion: FusionStrategy,
    /// Upper bound on assembled context size, in characters.
    pub max_context_chars: usize,
    /// Options forwarded to the generator.
    pub generation: GenerationOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkConfig::default(),
            parent_max_length: 256,
            chunk_max_length: 0,
            reduce_clustering: ReduceConfig::clustering(),
            reduce_visualization: ReduceConfig::visualization(),
            cluster: ClusterConfig::default(),
            fusion: FusionStrategy::default(),
            max_context_chars: 8000,
            generation: GenerationOptions::default(),
        }
    }
}

/// Retrieval mode for document search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// BM25 over document texts.
    #[default]
    Lexical,
    /// Query-mode embedding against document vectors.
    Semantic,
}

/// Options for [`Pipeline::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Retrieval mode.
    pub mode: SearchMode,
    /// Maximum hits returned.
    pub k: usize,
    /// Minimum similarity for semantic hits.
    pub min_score: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Lexical,
            k: 10,
            min_score: 0.0,
        }
    }
}

/// A document-tier search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Retrieval score.
    pub score: f32,
    /// Document text.
    pub text: String,
    /// Document metadata.
    pub metadata: crate::document::Metadata,
}

/// Options for [`Pipeline::ask_question`].
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Restrict candidate chunks to these parent document ids.
    pub scope: Option<HashSet<String>>,
    /// Context chunks assembled into the prompt.
    pub num_results: usize,
}

impl AskOptions {
    /// Default number of context chunks.
    pub const DEFAULT_NUM_RESULTS: usize = 5;

    fn num_results(&self) -> usize {
        if self.num_results == 0 {
            Self::DEFAULT_NUM_RESULTS
        } else {
            self.num_results
        }
    }
}

/// A chunk included in the generation context.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    /// Chunk id.
    pub chunk_id: String,
    /// Parent document id.
    pub parent_id: String,
    /// Passage text.
    pub text: String,
    /// Fused retrieval score.
    pub score: f32,
}

/// A completed answer with the context it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Generated answer text.
    pub text: String,
    /// Context chunks, best first.
    pub context: Vec<ContextChunk>,
}

/// A streaming answer: the context plus an incrementally produced token
/// stream. Dropping the stream or cancelling the token halts generation;
/// retrieval indices are untouched either way.
pub struct StreamingAnswer {
    /// Context chunks, best first.
    pub context: Vec<ContextChunk>,
    /// Generated tokens.
    pub tokens: TokenStream,
}

/// The pipeline orchestrator.
pub struct Pipeline {
    embedding: EmbeddingClient,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
    policy: FallbackPolicy,
    state: RwLock<DatasetState>,
    current: RwLock<Option<Arc<Dataset>>>,
}

impl Pipeline {
    /// Create a pipeline with default configuration.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self::with_config(embedder, generator, store, PipelineConfig::default())
    }

    /// Create a pipeline with explicit configuration.
    pub fn with_config(
        embedder: Arc<dyn TextEmbedder>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedding: EmbeddingClient::new(embedder),
            generator,
            store,
            config,
            policy: FallbackPolicy,
            state: RwLock::new(DatasetState::Empty),
            current: RwLock::new(None),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current position in the state machine.
    pub fn state(&self) -> DatasetState {
        *self.state.read()
    }

    /// The most recently published dataset, if any.
    pub fn current_dataset(&self) -> Option<Arc<Dataset>> {
        self.current.read().clone()
    }

    /// Process a document collection into a published dataset.
    ///
    /// Any stage failure aborts the run with a stage-tagged error and the
    /// state reverts to the last published dataset (or `Empty`).
    /// Cancellation surfaces as [`CartographError::Cancelled`] and is not a
    /// failure.
    pub async fn process_dataset(
        &self,
        documents: Vec<Document>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancelToken,
    ) -> Result<Arc<Dataset>> {
        let mut summary = ProcessingSummary::new();
        let mut documents = self
            .sanitize(documents, &mut summary)
            .map_err(|error| self.fail(error))?;

        info!(documents = documents.len(), "processing dataset");

        // Chunking.
        let chunker = Chunker::new(self.config.chunking.clone());
        let chunking = self
            .run_stage(StageKind::Chunking, &progress, &cancel, &mut summary, || {
                let output = chunker.chunk_all(&documents);
                for chunk in &output.chunks {
                    if !output.chunk_to_parent.contains_key(&chunk.id) {
                        return Err(CartographError::consistency(format!(
                            "chunk '{}' missing from the chunk-to-parent map",
                            chunk.id
                        )));
                    }
                }
                Ok(output)
            })
            .map_err(|error| self.fail(error))?;
        summary.chunk_count = chunking.chunks.len();
        self.check_chunk_budget(&mut summary);

        // Parent-tier embeddings (query mode, truncated to the token budget).
        let parent_texts: Vec<String> =
            documents.iter().map(|doc| doc.text.clone()).collect();
        let parent_vectors = self
            .embed_stage(
                StageKind::EmbeddingParent,
                &parent_texts,
                EmbeddingMode::Query,
                self.config.parent_max_length,
                &progress,
                &cancel,
                &mut summary,
            )
            .await
            .map_err(|error| self.fail(error))?;

        // Chunk-tier embeddings (passage mode).
        let chunk_texts: Vec<String> =
            chunking.chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let chunk_vectors = self
            .embed_stage(
                StageKind::EmbeddingChunk,
                &chunk_texts,
                EmbeddingMode::Passage,
                self.config.chunk_max_length,
                &progress,
                &cancel,
                &mut summary,
            )
            .await
            .map_err(|error| self.fail(error))?;

        // Indexing: both tiers, each with both sides rebuilt together.
        let (document_index, chunk_index) = self
            .run_stage(StageKind::Indexing, &progress, &cancel, &mut summary, || {
                Ok((
                    build_document_index(&documents, &parent_vectors)?,
                    build_chunk_index(&chunking.chunks, &chunk_vectors)?,
                ))
            })
            .map_err(|error| self.fail(error))?;

        // Two reductions: clustering-dimensional, then 2-D.
        let reduce_clustering =
            self.reduce_config_for(&self.config.reduce_clustering, documents.len(), &mut summary);
        let projection_clustering = self
            .reduce_stage(
                StageKind::ReducingClustering,
                &parent_vectors,
                reduce_clustering,
                &progress,
                &cancel,
                &mut summary,
            )
            .await
            .map_err(|error| self.fail(error))?;

        let reduce_visualization = self.reduce_config_for(
            &self.config.reduce_visualization,
            documents.len(),
            &mut summary,
        );
        let projection_2d = self
            .reduce_stage(
                StageKind::ReducingVisualization,
                &parent_vectors,
                reduce_visualization,
                &progress,
                &cancel,
                &mut summary,
            )
            .await
            .map_err(|error| self.fail(error))?;

        // Density clustering over the clustering-dimensional projection.
        self.enter_stage(StageKind::Clustering);
        let started = Instant::now();
        let cluster_config = self.config.cluster.clone();
        let cluster_points = projection_clustering.clone();
        let cluster_texts = parent_texts.clone();
        let cluster_progress = progress.clone();
        let cluster_cancel = cancel.clone();
        let clustering = tokio::task::spawn_blocking(move || {
            let stage = StageProgress::new(cluster_progress.as_ref(), StageKind::Clustering);
            cluster::cluster_with_keywords(
                &cluster_points,
                &cluster_texts,
                &cluster_config,
                stage,
                &cluster_cancel,
            )
        })
        .await
        .map_err(|error| self.fail(CartographError::other(format!("clustering task failed: {error}"))))?
        .map_err(|error| self.fail(stage_error(StageKind::Clustering, error)))?;
        summary
            .stage_timings_ms
            .push((StageKind::Clustering, started.elapsed().as_millis() as u64));
        summary.cluster_count = clustering.clusters.len();
        summary.noise_count = clustering
            .labels
            .iter()
            .filter(|&&label| label == NOISE_LABEL)
            .count();

        // Merge derived cluster fields onto the documents. The documents are
        // the authoritative metadata carrier; queries resolve metadata
        // through them, so the indices need no rebuild here.
        for (i, doc) in documents.iter_mut().enumerate() {
            let label = clustering.labels.get(i).copied().unwrap_or(NOISE_LABEL);
            let probability = clustering.probabilities.get(i).copied().unwrap_or(0.0);
            doc.metadata
                .insert("cluster".to_string(), MetadataValue::Number(label as f64));
            doc.metadata.insert(
                "cluster_probability".to_string(),
                MetadataValue::Number(probability as f64),
            );
            if let Some(cluster) = clustering.clusters.iter().find(|c| c.label == label) {
                let keyword_list = cluster
                    .keywords
                    .iter()
                    .map(|(term, _)| term.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                doc.metadata.insert(
                    "cluster_keywords".to_string(),
                    MetadataValue::String(keyword_list),
                );
            }
        }

        summary.completed_at = chrono::Utc::now();
        let dataset = Dataset {
            id: uuid::Uuid::new_v4().to_string(),
            documents,
            chunks: chunking.chunks,
            chunk_to_parent: chunking.chunk_to_parent,
            parent_vectors,
            chunk_vectors,
            document_index,
            chunk_index,
            projection_clustering,
            projection_2d,
            clustering,
            summary,
            model: self.embedding.model_name(),
            dimension: self.embedding.dimension(),
        };
        dataset
            .verify_consistency()
            .map_err(|error| self.fail(error))?;

        // Saving: serialize through the blob store, then publish atomically.
        self.enter_stage(StageKind::Saving);
        let started = Instant::now();
        let payload = persist::export_json(&dataset)
            .map_err(|error| self.fail(stage_error(StageKind::Saving, error)))?;
        self.store
            .put(&artifact_key(persist::DATASET_NAMESPACE, &dataset.id), &payload)
            .map_err(|error| self.fail(stage_error(StageKind::Saving, error)))?;
        debug!(
            bytes = payload.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset saved"
        );

        let dataset = Arc::new(dataset);
        *self.current.write() = Some(dataset.clone());
        *self.state.write() = DatasetState::Saved;
        info!(
            dataset = %dataset.id,
            documents = dataset.documents.len(),
            chunks = dataset.chunks.len(),
            clusters = dataset.clustering.clusters.len(),
            "dataset published"
        );
        Ok(dataset)
    }

    /// Search the document tier.
    pub async fn search(
        &self,
        dataset: &Dataset,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(CartographError::input_validation("empty query"));
        }

        let hits: Vec<(String, f32)> = match options.mode {
            SearchMode::Lexical => dataset
                .document_index
                .lexical_search(query, options.k)?
                .into_iter()
                .map(|hit| (hit.id, hit.score))
                .collect(),
            SearchMode::Semantic => {
                let query_vector = self.embed_query(query).await?;
                dataset
                    .document_index
                    .vector_search(&query_vector, options.k, options.min_score)?
                    .into_iter()
                    .map(|hit| (hit.id, hit.score))
                    .collect()
            }
        };

        // Documents carry the authoritative (cluster-derived) metadata.
        let by_id: ahash::AHashMap<&str, &Document> = dataset
            .documents
            .iter()
            .map(|doc| (doc.id.as_str(), doc))
            .collect();

        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(id.as_str()).map(|doc| SearchHit {
                    id: id.clone(),
                    score,
                    text: doc.text.clone(),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect())
    }

    /// Answer a question in one shot, grounded on fused chunk retrieval.
    pub async fn ask_question(
        &self,
        dataset: &Dataset,
        question: &str,
        options: &AskOptions,
    ) -> Result<Answer> {
        let context = self.retrieve_context(dataset, question, options).await?;
        let prompt = build_prompt(question, &context);
        let text = self
            .generator
            .generate(&prompt, &self.config.generation)
            .await?;
        Ok(Answer { text, context })
    }

    /// Answer a question as a token stream.
    ///
    /// The stream checks `cancel` before every token; cancellation halts
    /// emission promptly and discards partial generation state.
    pub async fn ask_question_stream(
        &self,
        dataset: &Dataset,
        question: &str,
        options: &AskOptions,
        cancel: CancelToken,
    ) -> Result<StreamingAnswer> {
        let context = self.retrieve_context(dataset, question, options).await?;
        let prompt = build_prompt(question, &context);
        let stream = self
            .generator
            .generate_stream(&prompt, &self.config.generation)
            .await?;

        let tokens = stream
            .take_while(move |_| {
                let alive = !cancel.is_cancelled();
                async move { alive }
            })
            .boxed();

        Ok(StreamingAnswer { context, tokens })
    }

    /// Read-only visualization snapshot of a dataset.
    pub fn visualization_data(&self, dataset: &Dataset) -> VisualizationData {
        dataset.visualization_data()
    }

    /// Retrieve and fuse chunk-tier candidates for a question.
    async fn retrieve_context(
        &self,
        dataset: &Dataset,
        question: &str,
        options: &AskOptions,
    ) -> Result<Vec<ContextChunk>> {
        if question.trim().is_empty() {
            return Err(CartographError::input_validation("empty question"));
        }
        let num_results = options.num_results();
        let pool = num_results * 4;

        let query_vector = self.embed_query(question).await?;
        let mut vector_hits = dataset
            .chunk_index
            .vector_search(&query_vector, pool, f32::MIN)?;
        let mut lexical_hits = dataset.chunk_index.lexical_search(question, pool)?;

        // Scope: an external selection concern, applied to both candidate
        // lists through the chunk-to-parent map before fusion.
        if let Some(scope) = &options.scope {
            let in_scope = |chunk_id: &str| {
                dataset
                    .chunk_to_parent
                    .get(chunk_id)
                    .map(|parent| scope.contains(parent))
                    .unwrap_or(false)
            };
            vector_hits.retain(|hit| in_scope(&hit.id));
            lexical_hits.retain(|hit| in_scope(&hit.id));
        }

        let fused = fuse(&vector_hits, &lexical_hits, &self.config.fusion, num_results);

        let mut context = Vec::new();
        let mut total_chars = 0usize;
        for hit in fused {
            let Some(entry) = dataset.chunk_index.entry(&hit.id) else {
                continue;
            };
            let parent_id = dataset
                .chunk_to_parent
                .get(&hit.id)
                .cloned()
                .unwrap_or_default();
            let block_chars = entry.text.len() + parent_id.len() + 8;
            if !context.is_empty() && total_chars + block_chars > self.config.max_context_chars {
                break;
            }
            total_chars += block_chars;
            context.push(ContextChunk {
                chunk_id: hit.id,
                parent_id,
                text: entry.text.clone(),
                score: hit.score,
            });
        }

        debug!(
            question_chars = question.len(),
            context_chunks = context.len(),
            context_chars = total_chars,
            "context assembled"
        );
        Ok(context)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vectors = self
            .embedding
            .embed_batch(
                &[query.to_string()],
                EmbeddingMode::Query,
                self.config.parent_max_length,
            )
            .await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| CartographError::embedding("embedder returned no query vector"))
    }

    fn sanitize(
        &self,
        documents: Vec<Document>,
        summary: &mut ProcessingSummary,
    ) -> Result<Vec<Document>> {
        if documents.is_empty() {
            return Err(CartographError::input_validation("no documents supplied"));
        }

        let mut seen_texts: AHashSet<String> = AHashSet::new();
        let mut seen_ids: AHashSet<String> = AHashSet::new();
        let mut kept = Vec::with_capacity(documents.len());
        for mut doc in documents {
            let trimmed = doc.text.trim();
            if trimmed.is_empty() {
                // FallbackKind::EmptyDocument
                debug_assert_eq!(
                    self.policy.action(FallbackKind::EmptyDocument),
                    FallbackAction::DropAndReport
                );
                summary.dropped_empty += 1;
                continue;
            }
            if !seen_texts.insert(trimmed.to_string()) {
                debug_assert_eq!(
                    self.policy.action(FallbackKind::DuplicateDocument),
                    FallbackAction::DropAndReport
                );
                summary.dropped_duplicates += 1;
                continue;
            }
            if doc.id.trim().is_empty() {
                doc.id = uuid::Uuid::new_v4().to_string();
                summary
                    .fallbacks
                    .push("assigned a generated id to a document without one".to_string());
            }
            if !seen_ids.insert(doc.id.clone()) {
                return Err(CartographError::input_validation(format!(
                    "duplicate document id '{}'",
                    doc.id
                )));
            }
            kept.push(doc);
        }

        if kept.is_empty() {
            return Err(CartographError::input_validation(
                "all documents were empty or duplicates",
            ));
        }
        if summary.dropped_empty > 0 || summary.dropped_duplicates > 0 {
            warn!(
                dropped_empty = summary.dropped_empty,
                dropped_duplicates = summary.dropped_duplicates,
                "dropped documents during sanitization"
            );
        }
        summary.ingested = kept.len();
        Ok(kept)
    }

    fn check_chunk_budget(&self, summary: &mut ProcessingSummary) {
        // Rough characters-per-token estimate; only the order of magnitude
        // matters for spotting a misconfiguration.
        const CHARS_PER_TOKEN: usize = 5;
        if self.config.chunk_max_length > 0
            && self.config.chunking.target_size > self.config.chunk_max_length * CHARS_PER_TOKEN
        {
            debug_assert_eq!(
                self.policy.action(FallbackKind::ChunkExceedsModelBudget),
                FallbackAction::WarnAndReport
            );
            let note = format!(
                "chunk target size {} exceeds the model budget of ~{} tokens; chunk tails will be truncated before embedding",
                self.config.chunking.target_size, self.config.chunk_max_length
            );
            warn!("{note}");
            summary.fallbacks.push(note);
        }
    }

    fn reduce_config_for(
        &self,
        base: &ReduceConfig,
        point_count: usize,
        summary: &mut ProcessingSummary,
    ) -> ReduceConfig {
        let mut config = base.clone();
        if point_count > 1 && config.n_neighbors >= point_count {
            debug_assert_eq!(
                self.policy.action(FallbackKind::NeighborsExceedPointCount),
                FallbackAction::ClampAndReport
            );
            let clamped = point_count - 1;
            summary.fallbacks.push(format!(
                "reducer neighbors clamped from {} to {clamped} for {point_count} points",
                config.n_neighbors
            ));
            config.n_neighbors = clamped;
        }
        config
    }

    fn run_stage<T>(
        &self,
        stage: StageKind,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancelToken,
        summary: &mut ProcessingSummary,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        cancel.check(stage.as_str())?;
        self.enter_stage(stage);
        let started = Instant::now();
        let output = work().map_err(|error| stage_error(stage, error))?;
        summary
            .stage_timings_ms
            .push((stage, started.elapsed().as_millis() as u64));
        progress.report(stage, 1.0);
        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    async fn embed_stage(
        &self,
        stage: StageKind,
        texts: &[String],
        mode: EmbeddingMode,
        max_length: usize,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancelToken,
        summary: &mut ProcessingSummary,
    ) -> Result<Vec<Vec<f32>>> {
        cancel.check(stage.as_str())?;
        self.enter_stage(stage);
        let started = Instant::now();
        let vectors = self
            .embedding
            .embed_batch(texts, mode, max_length)
            .await
            .map_err(|error| stage_error(stage, error))?;
        summary
            .stage_timings_ms
            .push((stage, started.elapsed().as_millis() as u64));
        progress.report(stage, 1.0);
        info!(stage = %stage, count = vectors.len(), "embedded tier");
        Ok(vectors)
    }

    async fn reduce_stage(
        &self,
        stage: StageKind,
        vectors: &[Vec<f32>],
        config: ReduceConfig,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancelToken,
        summary: &mut ProcessingSummary,
    ) -> Result<Vec<Vec<f32>>> {
        cancel.check(stage.as_str())?;
        self.enter_stage(stage);
        let started = Instant::now();

        let vectors = vectors.to_vec();
        let progress = progress.clone();
        let cancel = cancel.clone();
        let coords = tokio::task::spawn_blocking(move || {
            let stage_progress = StageProgress::new(progress.as_ref(), stage);
            reduce::reduce(&vectors, &config, stage_progress, &cancel)
        })
        .await
        .map_err(|error| CartographError::other(format!("reducer task failed: {error}")))?
        .map_err(|error| stage_error(stage, error))?;

        summary
            .stage_timings_ms
            .push((stage, started.elapsed().as_millis() as u64));
        info!(stage = %stage, points = coords.len(), "reduction complete");
        Ok(coords)
    }

    fn enter_stage(&self, stage: StageKind) {
        *self.state.write() = DatasetState::Running(stage);
        debug!(stage = %stage, "stage started");
    }

    /// Revert the state machine after a failed or cancelled run.
    fn fail(&self, error: CartographError) -> CartographError {
        let reverted = if self.current.read().is_some() {
            DatasetState::Saved
        } else {
            DatasetState::Empty
        };
        *self.state.write() = reverted;
        if !error.is_cancelled() {
            tracing::error!(error = %error, "dataset processing aborted");
        }
        error
    }
}

/// Tag an error with its stage, letting cancellation pass through untouched.
fn stage_error(stage: StageKind, error: CartographError) -> CartographError {
    if error.is_cancelled() {
        error
    } else {
        CartographError::stage(stage, error.to_string())
    }
}

/// Assemble the generation prompt from the question and its context.
fn build_prompt(question: &str, context: &[ContextChunk]) -> String {
    let mut prompt =
        String::from("Answer the question using only the context below.\n\n");
    for chunk in context {
        prompt.push_str(&format!("[{}]\n{}\n\n", chunk.parent_id, chunk.text));
    }
    prompt.push_str(&format!("Question: {question}\nAnswer:"));
    prompt
}
