//! Global, immutable configuration.
//!
//! Loaded once at startup and shared behind an `Arc`; never rebound at
//! request time. Tests construct override instances directly instead of
//! mutating a process-global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Embedding dimension. Must equal the storage column width; mismatch
    /// is a fatal config error (validated in `validate`).
    pub dimension: usize,
    pub retrieval: RetrievalConfig,
    pub confidence: ConfidenceConfig,
    pub synthesis: SynthesisConfig,
    pub graph: GraphConfig,
    pub logging: LoggingConfig,
    pub pool: PoolConfig,
    pub store: StoreConfig,
    pub entry_point: EntryPoint,
    pub pipeline_type: PipelineType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub k_lex: usize,
    pub k_vec: usize,
    pub k_retriever: usize,
    pub k_critic: usize,
    pub mmr_lambda: f32,
    /// Stage-two expansion query character budget.
    pub expansion_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// w0..w10 matching the confidence feature order (w0 is the intercept).
    pub weights: [f32; 11],
    pub abstain_th: f32,
    pub clarify_th: f32,
    /// Threshold below which s_vec does not count toward f5 cos_coverage.
    pub cosine_coverage_floor: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub default_threshold_pct: f32,
    pub explicit_selection_threshold_pct: f32,
    pub compression_budget_chars: usize,
    pub llm_temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub max_iters: u32,
    /// Per-query deadline in milliseconds.
    pub deadline_ms_default: u64,
    pub deadline_ms_cross_doc: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Bounded connection-pool size (recommended: workers * 2).
    pub size: usize,
}

/// Persisted state layout: LanceDB for `documents`/`chunks`
/// vector columns, Tantivy for the lexical index, sqlx/SQLite for
/// `thread_tracking`, all rooted under `db_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub table_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    Rest,
    Make,
    Toml,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineType {
    Direct,
    Langgraph,
}

impl RagConfig {
    /// Validate config values, returning a `CoreError::Config` for clearly
    /// broken configurations. Dimension mismatch against the storage layer
    /// is checked separately at store-open time (also `CoreError::Config`).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.dimension != 512 && self.dimension != 768 {
            return Err(CoreError::Config(format!(
                "dimension must be 512 or 768, got {}",
                self.dimension
            )));
        }
        if self.retrieval.k_lex == 0 || self.retrieval.k_vec == 0 {
            return Err(CoreError::Config("k_lex and k_vec must be > 0".into()));
        }
        if self.retrieval.k_retriever == 0 {
            return Err(CoreError::Config("k_retriever must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(CoreError::Config("mmr_lambda must be in [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence.abstain_th)
            || !(0.0..=1.0).contains(&self.confidence.clarify_th)
        {
            return Err(CoreError::Config(
                "confidence thresholds must be in [0,1]".into(),
            ));
        }
        if self.confidence.abstain_th > self.confidence.clarify_th {
            return Err(CoreError::Config(
                "abstain_th must be <= clarify_th".into(),
            ));
        }
        if self.synthesis.compression_budget_chars == 0 {
            return Err(CoreError::Config(
                "compression_budget_chars must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Load config from a JSON file, failing on any field the source does
    /// not supply rather than silently defaulting (defaults live only in
    /// `Default::default`).
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read config file: {e}")))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Verify the process-global embedding dimension against a vector
    /// actually produced by the embedding service.
    pub fn check_embedding_width(&self, produced_len: usize) -> Result<(), CoreError> {
        if produced_len != self.dimension {
            return Err(CoreError::Config(format!(
                "embedding width {produced_len} != configured dimension {}",
                self.dimension
            )));
        }
        Ok(())
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        let log_dir = data_dir.join("ragcore").join("logs");
        let db_path = data_dir.join("ragcore").join("store");

        Self {
            dimension: 768,
            retrieval: RetrievalConfig {
                k_lex: 40,
                k_vec: 40,
                k_retriever: 40,
                k_critic: 6,
                mmr_lambda: 0.7,
                expansion_chars: 500,
            },
            confidence: ConfidenceConfig {
                weights: [
                    -0.5, 2.4, 1.1, 1.6, -0.4, 0.8, 1.3, 1.1, 0.6, 0.45, 1.25,
                ],
                abstain_th: 0.20,
                clarify_th: 0.60,
                cosine_coverage_floor: 0.22,
            },
            synthesis: SynthesisConfig {
                default_threshold_pct: 40.0,
                explicit_selection_threshold_pct: 30.0,
                compression_budget_chars: 4000,
                llm_temperature: 0.18,
            },
            graph: GraphConfig {
                max_iters: 3,
                deadline_ms_default: 150_000,
                deadline_ms_cross_doc: 600_000,
            },
            logging: LoggingConfig { log_dir },
            pool: PoolConfig { size: 8 },
            store: StoreConfig {
                db_path,
                table_name: "chunks".to_string(),
            },
            entry_point: EntryPoint::Cli,
            pipeline_type: PipelineType::Direct,
        }
    }
}
