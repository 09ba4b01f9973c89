//! Error taxonomy for the core.
//!
//! Each variant matches an error kind named by the design: config errors are
//! fatal at startup, store/embedding/LLM/rerank/logger failures each have
//! their own propagation rule enforced by the callers in `graph::executor`
//! and `graph::nodes`, not by this enum itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Fatal at startup: dimension mismatch, missing required config.
    #[error("config error: {0}")]
    Config(String),

    /// Chunk store unreachable or transaction aborted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Embedding service call failed.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// LLM service call failed (planner/refiner/synthesizer have local fallbacks).
    #[error("llm failure: {0}")]
    LlmFailure(String),

    /// Cross-encoder failed to score a pair (per-pair fallback, never propagated alone).
    #[error("rerank failure: {0}")]
    RerankFailure(String),

    /// Agent logger could not write (warn-and-continue, never fails the query).
    #[error("logger failure: {0}")]
    LoggerFailure(String),

    /// Per-query deadline elapsed or the caller canceled.
    #[error("deadline exceeded or canceled")]
    DeadlineExceeded,
}

impl CoreError {
    /// Short machine-readable tag for this error kind, used as
    /// `metadata.error` in the thread tracker record when a query terminates
    /// early because of it.
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "config",
            CoreError::StoreUnavailable(_) => "store",
            CoreError::EmbeddingFailure(_) => "embedding",
            CoreError::LlmFailure(_) => "llm",
            CoreError::RerankFailure(_) => "rerank",
            CoreError::LoggerFailure(_) => "logger",
            CoreError::DeadlineExceeded => "deadline",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
