//! Text embedding collaborator trait.
//!
//! Implementations run the actual model (local inference, API-based service,
//! feature hashing); the library only requires the batch contract below.
//! Texts arrive already prepared — mode-prefixed and truncated — by
//! [`crate::embedding::client::EmbeddingClient`].

use async_trait::async_trait;

use crate::error::Result;

/// Trait for converting prepared texts to vector embeddings.
///
/// # Contract
///
/// `embed` must return exactly one vector per input text, all of dimension
/// [`TextEmbedder::dimension`]. Returning a different count is a hard error
/// at the call site; partial batches are never accepted.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use cartograph::embedding::embedder::TextEmbedder;
/// use cartograph::error::Result;
///
/// struct ZeroEmbedder {
///     dimension: usize,
/// }
///
/// #[async_trait]
/// impl TextEmbedder for ZeroEmbedder {
///     async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
///         Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
///     }
///
///     fn dimension(&self) -> usize {
///         self.dimension
///     }
/// }
/// ```
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Generate one embedding vector per input text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality of this embedder.
    fn dimension(&self) -> usize;

    /// Model identifier recorded in export metadata.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
