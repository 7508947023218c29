//! # Cartograph
//!
//! Semantic dataset mapping for Rust: ingest a text/tabular dataset and
//! derive tiered embeddings, a hybrid (vector + lexical) retrieval index, a
//! nonlinear low-dimensional projection, a density clustering with named
//! clusters, and a retrieval-augmented question-answering surface.
//!
//! ## Features
//!
//! - Overlapping passage chunking with deterministic chunk ids
//! - Two embedding tiers (document/query mode, chunk/passage mode) behind a
//!   pluggable embedder contract
//! - Exact flat vector search plus BM25 lexical search over one id set
//! - Approximate-neighbor-graph dimensionality reduction at two target
//!   dimensionalities
//! - Density clustering with stability-based extraction and keyword naming
//! - Reciprocal-rank fusion of vector and lexical retrieval for grounded
//!   question answering with streamed, cancellable generation
//! - Versioned JSON export/import that rebuilds indices from raw vectors
//!
//! The embedding and generation model runtimes, persistent storage engines,
//! and any rendering layer stay outside the crate, behind the
//! [`embedding::embedder::TextEmbedder`], [`generation::TextGenerator`],
//! and [`storage::BlobStore`] contracts.

pub mod chunking;
pub mod cluster;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod hybrid;
pub mod lexical;
pub mod persist;
pub mod pipeline;
pub mod reduce;
pub mod storage;
pub mod util;
pub mod vector;

pub mod prelude {
    //! Convenience re-exports for common usage.

    pub use crate::chunking::{ChunkConfig, Chunker};
    pub use crate::cluster::{Cluster, ClusterConfig, Clustering, NOISE_LABEL};
    pub use crate::document::{Chunk, Document, Metadata, MetadataValue};
    pub use crate::embedding::client::EmbeddingClient;
    pub use crate::embedding::embedder::TextEmbedder;
    pub use crate::embedding::{EmbeddingMode, EmbeddingTier};
    pub use crate::error::{CartographError, Result, StageKind};
    pub use crate::generation::{GenerationOptions, TextGenerator};
    pub use crate::hybrid::fusion::FusionStrategy;
    pub use crate::hybrid::index::{HybridEntry, HybridIndex};
    pub use crate::pipeline::dataset::{Dataset, ProcessingSummary, VisualizationData};
    pub use crate::pipeline::orchestrator::{
        AskOptions, Pipeline, PipelineConfig, SearchMode, SearchOptions,
    };
    pub use crate::reduce::ReduceConfig;
    pub use crate::storage::{BlobStore, FileBlobStore, MemoryBlobStore};
    pub use crate::util::{CancelToken, NoopProgress, ProgressSink};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
