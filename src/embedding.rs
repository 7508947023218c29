//! Text embedding support for the pipeline's two semantic tiers.
//!
//! cartograph does not run embedding models itself. It consumes any
//! implementation of [`embedder::TextEmbedder`] and wraps it in an
//! [`client::EmbeddingClient`] that owns the pieces the pipeline depends on:
//! mode-specific prefixing, token-budget truncation, session caching, and the
//! one-vector-per-input count invariant.
//!
//! # Tiers and modes
//!
//! Two independent embedding populations exist per dataset:
//!
//! - the **parent** tier embeds whole-document texts in [`EmbeddingMode::Query`]
//!   (symmetric similarity, feeds clustering and semantic document search),
//! - the **chunk** tier embeds passages in [`EmbeddingMode::Passage`]
//!   (asymmetric retrieval, feeds question answering).
//!
//! Each mode prepends a fixed textual marker before encoding. Cross-mode
//! score comparability depends on this framing being applied consistently,
//! which is why prefixing lives in the client and not in callers.
//!
//! # Shipped embedders
//!
//! - [`hashing::HashingEmbedder`] — deterministic feature-hash vectors, for
//!   tests and fully offline use.
//! - [`precomputed::PrecomputedEmbedder`] — serves vectors from a fixed map,
//!   for datasets whose vectors were computed externally.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod embedder;
pub mod hashing;
pub mod precomputed;

/// Embedding mode: how a text is framed before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    /// Symmetric similarity framing, used for clustering and document search.
    Query,
    /// Asymmetric retrieval framing, used for chunk retrieval.
    Passage,
}

impl EmbeddingMode {
    /// The fixed marker prepended to texts encoded in this mode.
    pub fn prefix(&self) -> &'static str {
        match self {
            EmbeddingMode::Query => "query: ",
            EmbeddingMode::Passage => "passage: ",
        }
    }
}

/// The two embedding populations a dataset carries.
///
/// Vectors within a tier share one dimensionality; tiers are never mixed in
/// one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTier {
    /// Whole-document vectors (query mode).
    Parent,
    /// Chunk vectors (passage mode).
    Chunk,
}

impl EmbeddingTier {
    /// The embedding mode this tier encodes with.
    pub fn mode(&self) -> EmbeddingMode {
        match self {
            EmbeddingTier::Parent => EmbeddingMode::Query,
            EmbeddingTier::Chunk => EmbeddingMode::Passage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_prefixes_are_distinct() {
        assert_eq!(EmbeddingMode::Query.prefix(), "query: ");
        assert_eq!(EmbeddingMode::Passage.prefix(), "passage: ");
        assert!(!EmbeddingMode::Query.prefix().starts_with(EmbeddingMode::Passage.prefix()));
        assert!(!EmbeddingMode::Passage.prefix().starts_with(EmbeddingMode::Query.prefix()));
    }

    #[test]
    fn test_tier_to_mode_mapping() {
        assert_eq!(EmbeddingTier::Parent.mode(), EmbeddingMode::Query);
        assert_eq!(EmbeddingTier::Chunk.mode(), EmbeddingMode::Passage);
    }
}
