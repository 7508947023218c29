//! Embedder serving pre-computed vectors.
//!
//! Used when vectors were computed externally (a previous session, another
//! toolchain) and no model runtime is available. Unknown texts are an error,
//! never silently zero-filled.

use ahash::AHashMap;
use async_trait::async_trait;

use crate::embedding::embedder::TextEmbedder;
use crate::error::{CartographError, Result};

/// An embedder that looks prepared texts up in a fixed map.
#[derive(Debug, Clone)]
pub struct PrecomputedEmbedder {
    vectors: AHashMap<String, Vec<f32>>,
    dimension: usize,
    model_name: String,
}

impl PrecomputedEmbedder {
    /// Build from (prepared text, vector) pairs.
    ///
    /// All vectors must share one dimension.
    pub fn new<S: Into<String>>(entries: Vec<(String, Vec<f32>)>, model_name: S) -> Result<Self> {
        let dimension = entries
            .first()
            .map(|(_, v)| v.len())
            .ok_or_else(|| CartographError::input_validation("no precomputed vectors supplied"))?;
        for (text, vector) in &entries {
            if vector.len() != dimension {
                return Err(CartographError::embedding(format!(
                    "precomputed vector for '{text}' has dimension {}, expected {dimension}",
                    vector.len()
                )));
            }
        }
        Ok(Self {
            vectors: entries.into_iter().collect(),
            dimension,
            model_name: model_name.into(),
        })
    }
}

#[async_trait]
impl TextEmbedder for PrecomputedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| {
                self.vectors.get(text).cloned().ok_or_else(|| {
                    CartographError::embedding(format!("no precomputed vector for '{text}'"))
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_known_texts() {
        let embedder = PrecomputedEmbedder::new(
            vec![
                ("query: a".to_string(), vec![1.0, 0.0]),
                ("query: b".to_string(), vec![0.0, 1.0]),
            ],
            "external",
        )
        .unwrap();

        let vectors = embedder
            .embed(&["query: b".to_string(), "query: a".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert_eq!(embedder.dimension(), 2);
    }

    #[tokio::test]
    async fn test_unknown_text_is_an_error() {
        let embedder =
            PrecomputedEmbedder::new(vec![("query: a".to_string(), vec![1.0])], "external")
                .unwrap();
        assert!(embedder.embed(&["query: zzz".to_string()]).await.is_err());
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let result = PrecomputedEmbedder::new(
            vec![
                ("a".to_string(), vec![1.0, 0.0]),
                ("b".to_string(), vec![1.0]),
            ],
            "external",
        );
        assert!(result.is_err());
    }
}
