//! Passage chunking.
//!
//! Splits documents into overlapping, size-bounded passages. Short documents
//! are returned whole as a single chunk; longer text is split into roughly
//! `target_size`-character passages that share `overlap` characters with
//! their neighbors. Chunking never hard-fails ingestion: any internal split
//! failure degrades to the single-chunk fallback.

use ahash::AHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::{Chunk, Document};

/// Documents within this factor of `target_size` are kept whole.
const SINGLE_CHUNK_SLACK: f64 = 1.2;

/// Maximum forward extension, in characters, when snapping a passage end to
/// the next word boundary.
const BOUNDARY_SNAP_WINDOW: usize = 32;

/// Number of documents chunked per parallel batch.
const CHUNK_BATCH_SIZE: usize = 50;

/// Configuration for passage chunking. All sizes are in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target passage size.
    pub target_size: usize,
    /// Characters shared between adjacent passages.
    pub overlap: usize,
    /// Passages shorter than this after trimming are dropped, never padded.
    pub min_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            overlap: 128,
            min_size: 50,
        }
    }
}

/// Output of chunking a document collection.
#[derive(Debug, Clone)]
pub struct ChunkingOutput {
    /// All chunks, in document order.
    pub chunks: Vec<Chunk>,
    /// Total map from chunk id to parent document id.
    pub chunk_to_parent: AHashMap<String, String>,
}

/// Splits document text into overlapping passages.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a chunker with the given configuration.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Split one document's text into ordered chunks.
    ///
    /// Identical (text, config) input yields identical boundaries and ids.
    /// This operation is infallible: a degenerate configuration or split
    /// failure falls back to returning the whole text as a single chunk.
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let trimmed = text.trim();
        let chars: Vec<char> = trimmed.chars().collect();

        let whole_limit = (self.config.target_size as f64 * SINGLE_CHUNK_SLACK) as usize;
        if chars.len() <= whole_limit {
            return vec![Chunk::new(doc_id, 0, trimmed)];
        }

        match self.split_passages(&chars) {
            Ok(passages) if !passages.is_empty() => passages
                .into_iter()
                .enumerate()
                .map(|(position, passage)| Chunk::new(doc_id, position, passage))
                .collect(),
            Ok(_) => vec![Chunk::new(doc_id, 0, trimmed)],
            Err(reason) => {
                warn!(doc_id, reason, "passage split failed, falling back to single chunk");
                vec![Chunk::new(doc_id, 0, trimmed)]
            }
        }
    }

    /// Chunk a document collection in fixed-size batches.
    ///
    /// Batches bound parallelism; output order follows input order. The
    /// returned chunk-to-parent map covers every produced chunk.
    pub fn chunk_all(&self, documents: &[Document]) -> ChunkingOutput {
        let mut chunks = Vec::new();
        for batch in documents.chunks(CHUNK_BATCH_SIZE) {
            let batch_chunks: Vec<Vec<Chunk>> = batch
                .par_iter()
                .map(|doc| self.chunk(&doc.id, &doc.text))
                .collect();
            for doc_chunks in batch_chunks {
                chunks.extend(doc_chunks);
            }
        }

        let chunk_to_parent = chunks
            .iter()
            .map(|chunk| (chunk.id.clone(), chunk.parent_id.clone()))
            .collect();

        ChunkingOutput {
            chunks,
            chunk_to_parent,
        }
    }

    fn split_passages(&self, chars: &[char]) -> std::result::Result<Vec<String>, &'static str> {
        let ChunkConfig {
            target_size,
            overlap,
            min_size,
        } = self.config;

        if target_size == 0 {
            return Err("target size is zero");
        }
        if overlap >= target_size {
            return Err("overlap is not smaller than target size");
        }
        let step = target_size - overlap;

        let mut passages = Vec::new();
        let mut start = 0usize;
        while start < chars.len() {
            let mut end = (start + target_size).min(chars.len());
            // Snap forward so passages do not end mid-word.
            let snap_limit = (end + BOUNDARY_SNAP_WINDOW).min(chars.len());
            while end < snap_limit && chars[end].is_alphanumeric() {
                end += 1;
            }

            let passage: String = chars[start..end].iter().collect();
            let passage = passage.trim();
            if passage.chars().count() >= min_size {
                passages.push(passage.to_string());
            }

            if end >= chars.len() {
                break;
            }
            start += step;
        }

        Ok(passages)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}
