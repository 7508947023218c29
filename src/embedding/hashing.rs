//! Deterministic feature-hashing embedder.
//!
//! Maps each whitespace token to a signed bucket of a fixed-dimension vector
//! and L2-normalizes the result. Texts sharing vocabulary land near each
//! other under cosine similarity, which is enough for tests and for fully
//! offline operation without a model runtime.

use ahash::RandomState;
use async_trait::async_trait;

use crate::embedding::embedder::TextEmbedder;
use crate::error::{CartographError, Result};

/// Fixed hasher seeds; hashing must be stable across runs.
const HASH_SEEDS: (u64, u64, u64, u64) = (0x5eed_0001, 0x5eed_0002, 0x5eed_0003, 0x5eed_0004);

/// Embedder producing deterministic feature-hash vectors.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    hasher: RandomState,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the given output dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(CartographError::input_validation(
                "embedding dimension must be positive",
            ));
        }
        Ok(Self {
            dimension,
            hasher: RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3),
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let hash = self.hasher.hash_one(token.as_str());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing-v1"
    }
}
