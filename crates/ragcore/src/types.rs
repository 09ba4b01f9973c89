//! Data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A D-dimensional real vector. Chunk embeddings are cosine-normalized at
/// ingestion time; the core does not re-normalize on read.
pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Multimodal,
    PdfText,
    PdfImage,
}

/// A document: identity `doc_id`, owns zero or more chunks. Deleting a
/// document cascades to its chunks (enforced by the chunk store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: Uuid,
    pub title: String,
    pub source_path: String,
    /// SHA-256 content hash, used for ingestion-time dedup.
    pub content_hash: String,
    pub meta: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A contiguous passage of a document with its own embedding and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub doc_id: Uuid,
    pub page_start: u32,
    pub page_end: u32,
    pub section: Option<String>,
    /// Non-empty passage text.
    pub text: String,
    pub is_ocr: bool,
    pub is_figure: bool,
    pub content_type: ContentType,
    pub image_path: Option<String>,
    pub embedding: Embedding,
    pub meta: HashMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn page_key(&self) -> (Uuid, u32) {
        (self.doc_id, self.page_start)
    }
}

/// A transient retrieval result: populated progressively as it passes
/// through hybrid retrieval → rerank → MMR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk_id: Uuid,
    pub doc_id: Uuid,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Lexical score, normalized to [0,1] within the result set.
    pub s_lex: f32,
    /// Vector similarity, normalized to [0,1].
    pub s_vec: f32,
    /// Cross-encoder score; `None` until the reranker runs.
    pub s_ce: Option<f32>,
    pub embedding: Embedding,
}

impl Candidate {
    /// Initial hybrid score used only for pre-rerank ordering:
    /// `s_hyb = 0.5*s_vec + 0.5*s_lex`. The blend coefficient is not
    /// exposed as configuration — equal weighting is the default.
    pub fn s_hyb(&self) -> f32 {
        0.5 * self.s_vec + 0.5 * self.s_lex
    }

    /// Score used for downstream ranking once rerank has run, falling back
    /// to the hybrid score when it has not (or the reranker failed on this
    /// pair — see `reranking::cross_encoder`).
    pub fn s_final(&self) -> f32 {
        self.s_ce.unwrap_or_else(|| self.s_hyb())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Answer,
    Clarify,
    Abstain,
}

/// One completed refinement cycle, recorded for audit/replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refinement {
    pub iteration: u32,
    pub previous_sub_query: String,
    pub new_sub_query: String,
    /// True if the refinement fell back to term-augmentation because the
    /// LLM failed or produced a duplicate sub-query.
    pub used_fallback: bool,
}

/// Per-query mutable record threaded through the graph executor and nodes.
/// The executor exclusively owns this; it hands out immutable snapshots to
/// the logger and tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub thread_id: String,
    pub user_id: String,
    pub question: String,
    pub plan: String,
    pub sub_query: String,
    pub candidates: Vec<Candidate>,
    pub iteration: u32,
    pub confidence: f32,
    pub action: Option<Action>,
    pub refinements: Vec<Refinement>,
    pub final_answer: Option<String>,
    pub target_doc_ids: Vec<Uuid>,
    pub cross_doc: bool,
    pub uploaded_doc_ids: Vec<Uuid>,
    pub selected_doc_ids: Vec<Uuid>,
    /// Arbitrary metadata surfaced about attached files (not parsed here).
    pub attachments_metadata: HashMap<String, serde_json::Value>,
    /// Set when the query terminated early because of a deadline, cancel, or
    /// an upstream failure (rather than running to a normal synthesizer
    /// decision) — e.g. `"deadline"`, `"embedding"`. Surfaced by the tracker
    /// as `metadata.error`.
    pub termination_error: Option<String>,
    /// Structural version tag, kept stable across code changes so stored
    /// snapshots remain usable for later dataset extraction.
    pub version: u32,
}

pub const GRAPH_STATE_VERSION: u32 = 1;

impl GraphState {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        let question = question.into();
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            sub_query: question.clone(),
            question,
            plan: String::new(),
            candidates: Vec::new(),
            iteration: 0,
            confidence: 0.0,
            action: None,
            refinements: Vec::new(),
            final_answer: None,
            target_doc_ids: Vec::new(),
            cross_doc: false,
            uploaded_doc_ids: Vec::new(),
            selected_doc_ids: Vec::new(),
            attachments_metadata: HashMap::new(),
            termination_error: None,
            version: GRAPH_STATE_VERSION,
        }
    }

    /// True if any doc scope was explicitly provided by the caller —
    /// drives the synthesizer's choice of percent threshold.
    pub fn has_explicit_doc_selection(&self) -> bool {
        !self.uploaded_doc_ids.is_empty()
            || !self.selected_doc_ids.is_empty()
            || !self.target_doc_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryPointLabel {
    Cli,
    Rest,
    Make,
    Toml,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineTypeLabel {
    Direct,
    Langgraph,
}

/// A persisted thread/query audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: i64,
    pub user_id: String,
    pub thread_id: String,
    pub doc_ids: Vec<Uuid>,
    pub query_text: String,
    pub final_answer: Option<String>,
    pub graphstate: Option<GraphState>,
    pub ingestion_meta: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entry_point: EntryPointLabel,
    pub pipeline_type: PipelineTypeLabel,
    pub cross_doc: bool,
    pub archived: bool,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Summary row returned by `list_threads` (no graphstate payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: i64,
    pub thread_id: String,
    pub query_text: String,
    pub final_answer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

/// The final answer object returned by `Answer(...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub pages: Vec<(Uuid, u32, u32)>,
    pub doc_ids: Vec<Uuid>,
    pub confidence: f32,
    pub action: Action,
    pub iterations: u32,
    pub refinements: Vec<Refinement>,
}

/// Options accepted by `Answer(...)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerOptions {
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub doc_filter: Option<Vec<Uuid>>,
    pub cross_doc: bool,
    pub uploaded_doc_ids: Vec<Uuid>,
    pub selected_doc_ids: Vec<Uuid>,
    pub attachments_metadata: HashMap<String, serde_json::Value>,
}

/// Retrieval request options for `retrieve(...)`.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub k_lex: usize,
    pub k_vec: usize,
    pub k_out: usize,
    pub doc_filter: Option<Vec<Uuid>>,
    pub doc_exclude: Option<Vec<Uuid>>,
}
