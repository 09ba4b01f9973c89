//! Embedding service interface.
//!
//! Embedding model inference (text + image encoders) is explicitly out of
//! scope for the core. The core consumes embeddings through this narrow
//! interface; it never loads model weights itself.

use async_trait::async_trait;
use std::path::Path;

use crate::error::CoreError;

/// `embed_text(string) -> vector of length D`; `embed_image(path) -> vector
/// of length D`. Deterministic for identical input (within model
/// precision). Failures are transient and propagate as `EmbeddingFailure`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, CoreError>;
    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, CoreError>;
    fn dimension(&self) -> usize;
}

/// Deterministic hash-based stub embedder for tests. Not suitable for
/// production — it carries no semantic signal beyond crude lexical
/// overlap, which is sufficient for exercising retrieval plumbing.
#[cfg(any(test, feature = "test-support"))]
pub struct StubEmbedder {
    pub dimension: usize,
    pub fail: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
        }
    }

    pub fn failing(dimension: usize) -> Self {
        Self {
            dimension,
            fail: true,
        }
    }

    /// Deterministic bag-of-words style embedding: each vocabulary term
    /// hashes to a dimension bucket it increments, then the vector is
    /// L2-normalized. Two texts sharing terms get nonzero cosine similarity.
    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for term in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in term.bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash as usize) % self.dimension;
            v[bucket] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-9 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        if self.fail {
            return Err(CoreError::EmbeddingFailure("stub embedder configured to fail".into()));
        }
        Ok(self.vectorize(text))
    }

    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, CoreError> {
        if self.fail {
            return Err(CoreError::EmbeddingFailure("stub embedder configured to fail".into()));
        }
        Ok(self.vectorize(&path.to_string_lossy()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_embedder_is_deterministic() {
        let e = StubEmbedder::new(64);
        let a = e.embed_text("orbital mechanics satellites").await.unwrap();
        let b = e.embed_text("orbital mechanics satellites").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn stub_embedder_respects_dimension() {
        let e = StubEmbedder::new(512);
        let v = e.embed_text("hello").await.unwrap();
        assert_eq!(v.len(), 512);
        assert_eq!(e.dimension(), 512);
    }

    #[tokio::test]
    async fn failing_embedder_propagates_embedding_failure() {
        let e = StubEmbedder::failing(768);
        let err = e.embed_text("x").await.unwrap_err();
        assert!(matches!(err, CoreError::EmbeddingFailure(_)));
    }
}
