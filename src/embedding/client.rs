//! Batch embedding with mode prefixing, truncation, and session caching.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::embedding::EmbeddingMode;
use crate::embedding::embedder::TextEmbedder;
use crate::error::{CartographError, Result};

/// Wrapper around a [`TextEmbedder`] that owns text preparation and caching.
///
/// Preparation applies, in order: truncation to a whitespace-token budget
/// (`max_length`, `0` = unlimited), then the mode prefix. Prepared texts that
/// were embedded earlier in the session are served from the cache; only
/// misses reach the collaborator, in a single batch call.
pub struct EmbeddingClient {
    embedder: Arc<dyn TextEmbedder>,
    cache: Mutex<AHashMap<String, Vec<f32>>>,
}

impl EmbeddingClient {
    /// Wrap an embedder with an empty session cache.
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            embedder,
            cache: Mutex::new(AHashMap::new()),
        }
    }

    /// Output dimensionality of the wrapped embedder.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Model identifier of the wrapped embedder.
    pub fn model_name(&self) -> String {
        self.embedder.model_name().to_string()
    }

    /// Number of cached vectors in this session.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Embed a batch of texts in the given mode.
    ///
    /// Returns exactly one vector per input text. A count or dimension
    /// mismatch from the collaborator raises [`CartographError::Embedding`];
    /// partial batches are never returned.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbeddingMode,
        max_length: usize,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared: Vec<String> = texts
            .iter()
            .map(|text| prepare_text(text, mode, max_length))
            .collect();

        let mut miss_texts = Vec::new();
        {
            let cache = self.cache.lock();
            for text in &prepared {
                if !cache.contains_key(text) && !miss_texts.contains(text) {
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let vectors = self.embedder.embed(&miss_texts).await?;
            if vectors.len() != miss_texts.len() {
                return Err(CartographError::embedding(format!(
                    "embedder returned {} vectors for {} inputs",
                    vectors.len(),
                    miss_texts.len()
                )));
            }
            let expected_dim = self.embedder.dimension();
            for vector in &vectors {
                if vector.len() != expected_dim {
                    return Err(CartographError::embedding(format!(
                        "embedder returned a {}-dim vector, expected {}",
                        vector.len(),
                        expected_dim
                    )));
                }
            }

            let mut cache = self.cache.lock();
            for (text, vector) in miss_texts.iter().zip(vectors) {
                cache.insert(text.clone(), vector);
            }
        } else {
            debug!(batch = texts.len(), "embedding batch fully served from cache");
        }

        let cache = self.cache.lock();
        prepared
            .iter()
            .map(|text| {
                cache.get(text).cloned().ok_or_else(|| {
                    CartographError::embedding("cache entry missing after batch fill")
                })
            })
            .collect()
    }
}

/// Truncate to a whitespace-token budget and apply the mode prefix.
fn prepare_text(text: &str, mode: EmbeddingMode, max_length: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if max_length > 0 && tokens.len() > max_length {
        format!("{}{}", mode.prefix(), tokens[..max_length].join(" "))
    } else {
        format!("{}{}", mode.prefix(), text.trim())
    }
}
