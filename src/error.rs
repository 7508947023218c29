//! Error types for the cartograph library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`CartographError`] enum. Stage failures raised while processing a dataset
//! are tagged with the [`StageKind`] that raised them, so callers can tell a
//! chunking failure from a reducer failure without parsing messages.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stages a dataset moves through.
///
/// Used both by the orchestrator's state machine and to tag
/// [`CartographError::Stage`] errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Splitting documents into passages.
    Chunking,
    /// Embedding document texts (query mode).
    EmbeddingParent,
    /// Embedding chunk texts (passage mode).
    EmbeddingChunk,
    /// Building the hybrid indices.
    Indexing,
    /// Reduction to clustering dimensionality.
    ReducingClustering,
    /// Reduction to visualization dimensionality.
    ReducingVisualization,
    /// Density clustering of the reduced layout.
    Clustering,
    /// Serializing the completed dataset to the blob store.
    Saving,
}

impl StageKind {
    /// Stable string form used in log fields and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Chunking => "chunking",
            StageKind::EmbeddingParent => "embedding_parent",
            StageKind::EmbeddingChunk => "embedding_chunk",
            StageKind::Indexing => "indexing",
            StageKind::ReducingClustering => "reducing_clustering",
            StageKind::ReducingVisualization => "reducing_visualization",
            StageKind::Clustering => "clustering",
            StageKind::Saving => "saving",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for cartograph operations.
#[derive(Error, Debug)]
pub enum CartographError {
    /// I/O errors (file-backed blob store, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input rejected before any stage ran.
    #[error("Input validation error: {0}")]
    InputValidation(String),

    /// A pipeline stage raised; the run is aborted and the dataset reverts.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// The stage that raised.
        stage: StageKind,
        /// What went wrong.
        message: String,
    },

    /// Cross-artifact invariant violated (id-set mismatch, dangling
    /// chunk-parent reference, array-length mismatch).
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Non-finite or degenerate numeric output; blocks downstream stages.
    #[error("Numeric anomaly: {0}")]
    NumericAnomaly(String),

    /// Cooperative cancellation. Not a failure: partial output is discarded
    /// and published artifacts are left untouched.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Embedding collaborator errors (count mismatch, unknown text).
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Index build/query errors.
    #[error("Index error: {0}")]
    Index(String),

    /// Blob store errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generation collaborator errors.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Generic anyhow error from collaborators.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with [`CartographError`].
pub type Result<T> = std::result::Result<T, CartographError>;

impl CartographError {
    /// Create a new input validation error.
    pub fn input_validation<S: Into<String>>(msg: S) -> Self {
        CartographError::InputValidation(msg.into())
    }

    /// Create a new stage-tagged error.
    pub fn stage<S: Into<String>>(stage: StageKind, msg: S) -> Self {
        CartographError::Stage {
            stage,
            message: msg.into(),
        }
    }

    /// Create a new consistency error.
    pub fn consistency<S: Into<String>>(msg: S) -> Self {
        CartographError::Consistency(msg.into())
    }

    /// Create a new numeric anomaly error.
    pub fn numeric<S: Into<String>>(msg: S) -> Self {
        CartographError::NumericAnomaly(msg.into())
    }

    /// Create a new cancellation error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        CartographError::Cancelled(msg.into())
    }

    /// Create a new embedding error.
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        CartographError::Embedding(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        CartographError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        CartographError::Storage(msg.into())
    }

    /// Create a new generation error.
    pub fn generation<S: Into<String>>(msg: S) -> Self {
        CartographError::Generation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        CartographError::Other(msg.into())
    }

    /// Whether this error represents cooperative cancellation rather than a
    /// real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CartographError::Cancelled(_))
    }

    /// The stage tag, if this is a stage failure.
    pub fn stage_kind(&self) -> Option<StageKind> {
        match self {
            CartographError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
