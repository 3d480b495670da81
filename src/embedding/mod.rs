//! Embedding generation for dense retrieval.
//!
//! The [`Embedder`] trait is the seam to an external embedding provider
//! (every call is a suspension point). [`HashEmbedder`] is the
//! deterministic lexical fallback used in tests and offline operation;
//! [`RetryingEmbedder`] wraps any embedder with the bounded backoff
//! schedule.

mod hash;
mod retry;

pub use hash::HashEmbedder;
pub use retry::RetryingEmbedder;

use async_trait::async_trait;

use crate::core::EMBEDDING_DIM;
use crate::error::ProviderError;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`) to support
/// parallel fan-out during retrieval. `embed` preserves input order and
/// batches internally up to the provider's per-request limit.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates embeddings for the given texts, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when generation fails.
    async fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Generates a single embedding.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when generation fails or the provider
    /// returns an empty batch.
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut batch = self.embed(&[text]).await?;
        batch.pop().ok_or_else(|| {
            ProviderError::Malformed("provider returned an empty batch".to_string())
        })
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 and 1.0; 0.0 for mismatched lengths or
/// zero-magnitude inputs.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Creates the default embedder: the deterministic hash fallback at the
/// shared dimensionality, wrapped with the retry schedule.
#[must_use]
pub fn default_embedder() -> RetryingEmbedder<HashEmbedder> {
    RetryingEmbedder::new(HashEmbedder::new(EMBEDDING_DIM))
}
