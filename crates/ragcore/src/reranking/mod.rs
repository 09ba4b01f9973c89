//! Cross-encoder reranker.

pub mod cross_encoder;
pub mod reranker;

pub use cross_encoder::CrossEncoderReranker;
pub use reranker::{CrossEncoderScorer, Reranker};
