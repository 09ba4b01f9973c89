//! Agentic retrieval-augmented question-answering core.
//!
//! Hybrid lexical+vector retrieval → cross-encoder rerank → MMR
//! diversification → confidence-gated agentic reasoning graph, with audit
//! logging and per-thread tracking. This crate owns the reasoning;
//! embedding inference, LLM inference, and chunk persistence are consumed
//! through the narrow interfaces in `embeddings`, `llm`, and `store` so
//! any concrete provider or store can be swapped in underneath it.

pub mod citation;
pub mod config;
pub mod confidence;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod pool;
pub mod reranking;
pub mod retrieval;
pub mod sanitizer;
pub mod store;
pub mod tracker;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use config::RagConfig;
use embeddings::Embedder;
use error::CoreError;
use graph::{GraphContext, GraphExecutor};
use llm::LlmClient;
use logging::AgentLogger;
use reranking::{CrossEncoderScorer, Reranker};
use retrieval::HybridRetriever;
use sanitizer::sanitize;
use store::ChunkStore;
use tracker::ThreadTracker;
use types::{AnswerOptions, AnswerResult, Candidate, EntryPointLabel, GraphState, PipelineTypeLabel, RetrieveOptions};

/// Facade over the whole core, bundling the collaborators every operation
/// needs. Construct once per process (or per worker) and share behind an
/// `Arc`; every method takes `&self`.
pub struct RagCore<'a> {
    store: Arc<dyn ChunkStore>,
    embedder: &'a dyn Embedder,
    llm: &'a dyn LlmClient,
    scorer: &'a dyn CrossEncoderScorer,
    config: RagConfig,
    logger: AgentLogger,
    tracker: ThreadTracker,
}

impl<'a> RagCore<'a> {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: &'a dyn Embedder,
        llm: &'a dyn LlmClient,
        scorer: &'a dyn CrossEncoderScorer,
        config: RagConfig,
        tracker: ThreadTracker,
    ) -> Self {
        let logger = AgentLogger::new(&config.logging.log_dir);
        Self {
            store,
            embedder,
            llm,
            scorer,
            config,
            logger,
            tracker,
        }
    }

    /// `Retrieve(question, k, filter) -> candidates`: pure
    /// retrieval, no agent loop.
    pub async fn retrieve(
        &self,
        question: &str,
        k: usize,
        filter: Option<Vec<Uuid>>,
    ) -> Result<Vec<Candidate>, CoreError> {
        let sanitized = sanitize(question);
        let embedding = self.embedder.embed_text(question).await?;
        let retriever = HybridRetriever::new(self.store.clone());
        let options = RetrieveOptions {
            k_lex: self.config.retrieval.k_lex,
            k_vec: self.config.retrieval.k_vec,
            k_out: k,
            doc_filter: filter,
            doc_exclude: None,
        };
        retriever.retrieve(&sanitized.lexical_query, &embedding, &options).await
    }

    /// `Rerank(question, candidates, k) -> candidates`: standalone
    /// rerank, independent of the agent loop.
    pub fn rerank(&self, question: &str, candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
        Reranker::new(self.scorer).rerank(question, candidates, k)
    }

    /// `Answer(question, options) -> AnswerResult`: the full
    /// agentic graph, with tracker and audit-log side effects.
    pub async fn answer(&self, question: &str, options: AnswerOptions) -> AnswerResult {
        let thread_id = options.thread_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let user_id = options.user_id.clone().unwrap_or_else(|| "anonymous".to_string());

        let mut state = GraphState::new(thread_id.clone(), user_id.clone(), question);
        state.target_doc_ids = options.doc_filter.clone().unwrap_or_default();
        state.cross_doc = options.cross_doc;
        state.uploaded_doc_ids = options.uploaded_doc_ids.clone();
        state.selected_doc_ids = options.selected_doc_ids.clone();
        state.attachments_metadata = options.attachments_metadata.clone();

        let mut all_doc_ids = state.target_doc_ids.clone();
        all_doc_ids.extend(state.uploaded_doc_ids.iter().copied());
        all_doc_ids.extend(state.selected_doc_ids.iter().copied());

        let record_id = self
            .tracker
            .insert_on_start(
                &user_id,
                &thread_id,
                &all_doc_ids,
                question,
                EntryPointLabel::Cli,
                PipelineTypeLabel::Direct,
                state.cross_doc,
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "thread tracker insert_on_start failed; continuing without a tracker record");
                -1
            });

        let ctx = GraphContext::new(self.store.clone(), self.embedder, self.llm, self.scorer, &self.config);
        let executor = GraphExecutor::new(ctx).with_observer(&self.logger);
        let result = executor.run(&mut state).await;

        if record_id >= 0 {
            let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
            if let Some(reason) = &state.termination_error {
                metadata.insert("error".to_string(), serde_json::Value::String(reason.clone()));
            }
            if let Err(e) = self
                .tracker
                .update_on_completion(record_id, &result.answer, &state, &metadata)
                .await
            {
                tracing::warn!(error = %e, "thread tracker update_on_completion failed");
            }
        }

        result
    }

    /// Thread tracker passthroughs.
    pub async fn list_threads(
        &self,
        user_id: &str,
        limit: i64,
        include_archived: bool,
    ) -> Result<Vec<types::ThreadSummary>, CoreError> {
        self.tracker.list_threads(user_id, limit, include_archived).await
    }

    pub async fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<Option<types::ThreadRecord>, CoreError> {
        self.tracker.get_thread(user_id, thread_id).await
    }

    pub async fn archive_thread(&self, thread_id: &str, user_id: &str, archived: bool) -> Result<(), CoreError> {
        self.tracker.archive(thread_id, user_id, archived).await
    }
}
