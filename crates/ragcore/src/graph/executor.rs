//! Graph executor: drives planner → retriever → compressor →
//! critic → refine_retrieve ↺ → synthesizer, bounded by `MAX_ITERS`, with a
//! per-query deadline and exception→abstain routing.

use std::time::Duration;

use uuid::Uuid;

use crate::types::{Action, AnswerResult, GraphState};

use super::nodes::{self, GraphContext, ABSTAIN_ANSWER};

/// Observer hook for per-node audit events. The
/// executor calls this after every node completes; a no-op by default so the
/// executor has no hard dependency on a particular logging backend.
pub trait GraphObserver: Send + Sync {
    fn on_node(&self, node_name: &str, state: &GraphState);
}

pub struct GraphExecutor<'a> {
    ctx: GraphContext<'a>,
    observer: Option<&'a dyn GraphObserver>,
}

impl<'a> GraphExecutor<'a> {
    pub fn new(ctx: GraphContext<'a>) -> Self {
        Self { ctx, observer: None }
    }

    pub fn with_observer(mut self, observer: &'a dyn GraphObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, node_name: &str, state: &GraphState) {
        if let Some(observer) = self.observer {
            observer.on_node(node_name, state);
        }
    }

    /// Run the full graph to completion (or timeout/abstain), returning the
    /// caller-facing result. Mutates `state` in place so the tracker can
    /// persist the final snapshot afterward.
    pub async fn run(&self, state: &mut GraphState) -> AnswerResult {
        let deadline_ms = if state.cross_doc {
            self.ctx.config.graph.deadline_ms_cross_doc
        } else {
            self.ctx.config.graph.deadline_ms_default
        };

        let outcome = tokio::time::timeout(Duration::from_millis(deadline_ms), self.run_inner(state)).await;
        if outcome.is_err() {
            state.action = Some(Action::Abstain);
            state.final_answer = Some(ABSTAIN_ANSWER.to_string());
            state.termination_error = Some("deadline".to_string());
        }

        self.build_result(state)
    }

    async fn run_inner(&self, state: &mut GraphState) {
        nodes::plan(&self.ctx, state).await;
        self.notify("planner", state);

        loop {
            if let Err(error) = nodes::retrieve(&self.ctx, state).await {
                tracing::warn!(%error, thread_id = %state.thread_id, "retriever node failed, abstaining");
                state.action = Some(Action::Abstain);
                state.final_answer = Some(ABSTAIN_ANSWER.to_string());
                state.termination_error = Some(error.tag().to_string());
                self.notify("retriever", state);
                return;
            }
            self.notify("retriever", state);

            nodes::critic(&self.ctx, state);
            self.notify("critic", state);

            let exhausted = state.iteration >= self.ctx.config.graph.max_iters;
            match state.action {
                Some(Action::Answer) => break,
                _ if exhausted => break,
                _ => {
                    nodes::refine_retrieve(&self.ctx, state).await;
                    self.notify("refine_retrieve", state);
                }
            }
        }

        let bundle = nodes::compress(&self.ctx, state);
        self.notify("compressor", state);

        nodes::synthesize(&self.ctx, state, &bundle).await;
        self.notify("synthesizer", state);
    }

    fn build_result(&self, state: &GraphState) -> AnswerResult {
        let pages: Vec<(Uuid, u32, u32)> = state
            .candidates
            .iter()
            .map(|c| (c.doc_id, c.page_start, c.page_end))
            .collect();

        let mut doc_ids: Vec<Uuid> = state.candidates.iter().map(|c| c.doc_id).collect();
        doc_ids.sort();
        doc_ids.dedup();

        AnswerResult {
            answer: state.final_answer.clone().unwrap_or_default(),
            pages,
            doc_ids,
            confidence: state.confidence,
            action: state.action.unwrap_or(Action::Abstain),
            iterations: state.iteration,
            refinements: state.refinements.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::embeddings::StubEmbedder;
    use crate::error::CoreError;
    use crate::llm::StubLlmClient;
    use crate::reranking::reranker::CrossEncoderScorer;
    use crate::store::{ChunkStore, LexicalHit, VectorHit};
    use crate::types::{Chunk, ContentType, Document};
    use async_trait::async_trait;
    use std::collections::HashMap as Map;
    use std::sync::{Arc, Mutex};

    struct FakeStore {
        chunks: Mutex<Map<Uuid, Chunk>>,
    }

    #[async_trait]
    impl ChunkStore for FakeStore {
        async fn lexical_search(
            &self,
            _lex_query: &str,
            _k: usize,
            _doc_filter: Option<&[Uuid]>,
            _doc_exclude: Option<&[Uuid]>,
        ) -> Result<Vec<LexicalHit>, CoreError> {
            let chunks = self.chunks.lock().unwrap();
            Ok(chunks.keys().map(|id| LexicalHit { chunk_id: *id, score: 1.0 }).collect())
        }

        async fn vector_search(
            &self,
            _query_embedding: &[f32],
            _k: usize,
            _doc_filter: Option<&[Uuid]>,
            _doc_exclude: Option<&[Uuid]>,
        ) -> Result<Vec<VectorHit>, CoreError> {
            let chunks = self.chunks.lock().unwrap();
            Ok(chunks
                .keys()
                .map(|id| VectorHit { chunk_id: *id, cosine_distance: 0.2 })
                .collect())
        }

        async fn get_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Chunk>, CoreError> {
            let chunks = self.chunks.lock().unwrap();
            Ok(chunk_ids.iter().filter_map(|id| chunks.get(id).cloned()).collect())
        }

        async fn get_document(&self, _doc_id: Uuid) -> Result<Option<Document>, CoreError> {
            Ok(None)
        }

        async fn insert_document(&self, _doc: Document) -> Result<(), CoreError> {
            Ok(())
        }

        async fn insert_chunks(&self, _chunks: Vec<Chunk>) -> Result<(), CoreError> {
            Ok(())
        }

        async fn delete_document(&self, _doc_id: Uuid) -> Result<usize, CoreError> {
            Ok(0)
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    fn fake_chunk(id: Uuid, doc_id: Uuid, text: &str) -> Chunk {
        Chunk {
            chunk_id: id,
            doc_id,
            page_start: 1,
            page_end: 1,
            section: None,
            text: text.to_string(),
            is_ocr: false,
            is_figure: false,
            content_type: ContentType::Text,
            image_path: None,
            embedding: vec![1.0; 8],
            meta: Map::new(),
        }
    }

    struct FixedScorer(f32);
    impl CrossEncoderScorer for FixedScorer {
        fn score(&self, _q: &str, _t: &str) -> anyhow::Result<f32> {
            Ok(self.0)
        }
    }

    struct RecordingObserver {
        seen: Mutex<Vec<String>>,
    }

    impl GraphObserver for RecordingObserver {
        fn on_node(&self, node_name: &str, _state: &GraphState) {
            self.seen.lock().unwrap().push(node_name.to_string());
        }
    }

    #[tokio::test]
    async fn confident_run_answers_without_refining() {
        let doc = Uuid::new_v4();
        let chunk_id = Uuid::new_v4();
        let mut chunks = Map::new();
        chunks.insert(chunk_id, fake_chunk(chunk_id, doc, "Paris is the capital of France."));
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore { chunks: Mutex::new(chunks) });

        let embedder = StubEmbedder::new(8);
        let llm = StubLlmClient::responding("Paris is the capital of France [1].\n[1] doc:x p1-1");
        let scorer = FixedScorer(5.0); // strongly confident cross-encoder score
        let config = RagConfig::default();

        let ctx = GraphContext::new(store, &embedder, &llm, &scorer, &config);
        let executor = GraphExecutor::new(ctx);

        let mut state = GraphState::new("t1", "u1", "What is the capital of France?");
        let result = executor.run(&mut state).await;

        assert_eq!(result.action, Action::Answer);
        assert_eq!(state.iteration, 0, "a confident first pass should not refine");
        assert!(result.answer.contains("Paris"));
    }

    #[tokio::test]
    async fn no_candidates_refines_up_to_max_iters_then_abstains() {
        // An empty store yields zero candidates every retrieval pass, so the
        // critic's confidence collapses to the logistic intercept alone
        // (Clarify, never Answer) and the loop must run to its bound.
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore { chunks: Mutex::new(Map::new()) });

        let embedder = StubEmbedder::new(8);
        let llm = StubLlmClient::responding(""); // planner/refiner/synthesizer all fall back
        let scorer = FixedScorer(-5.0);
        let mut config = RagConfig::default();
        config.graph.max_iters = 2;

        let ctx = GraphContext::new(store, &embedder, &llm, &scorer, &config);
        let executor = GraphExecutor::new(ctx);

        let mut state = GraphState::new("t2", "u2", "some obscure question");
        let result = executor.run(&mut state).await;

        assert_eq!(state.iteration, 2, "loop must stop at max_iters, not run forever");
        assert_eq!(result.action, Action::Abstain);
        assert!(result.answer.len() > 0);
    }

    #[tokio::test]
    async fn embedding_failure_routes_to_abstain_without_panicking() {
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore { chunks: Mutex::new(Map::new()) });
        let embedder = StubEmbedder::failing(8);
        let llm = StubLlmClient::responding("irrelevant");
        let scorer = FixedScorer(0.0);
        let config = RagConfig::default();

        let ctx = GraphContext::new(store, &embedder, &llm, &scorer, &config);
        let executor = GraphExecutor::new(ctx);

        let mut state = GraphState::new("t3", "u3", "question");
        let result = executor.run(&mut state).await;

        assert_eq!(result.action, Action::Abstain);
        assert_eq!(result.answer, "I don't know.");
        assert_eq!(state.termination_error.as_deref(), Some("embedding"));
    }

    #[tokio::test]
    async fn deadline_expiry_abstains_and_tags_termination_error() {
        let doc = Uuid::new_v4();
        let chunk_id = Uuid::new_v4();
        let mut chunks = Map::new();
        chunks.insert(chunk_id, fake_chunk(chunk_id, doc, "Paris is the capital of France."));
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore { chunks: Mutex::new(chunks) });

        let embedder = StubEmbedder::new(8);
        let llm = StubLlmClient::slow("Paris [1].\n[1] doc:x p1-1", Duration::from_secs(2));
        let scorer = FixedScorer(5.0);
        let mut config = RagConfig::default();
        config.graph.deadline_ms_default = 50;

        let ctx = GraphContext::new(store, &embedder, &llm, &scorer, &config);
        let executor = GraphExecutor::new(ctx);

        let mut state = GraphState::new("t5", "u5", "What is the capital of France?");
        let result = executor.run(&mut state).await;

        assert_eq!(result.action, Action::Abstain);
        assert_eq!(result.answer, "I don't know.");
        assert_eq!(state.termination_error.as_deref(), Some("deadline"));
    }

    #[tokio::test]
    async fn observer_sees_every_node_in_a_non_refining_run() {
        let doc = Uuid::new_v4();
        let chunk_id = Uuid::new_v4();
        let mut chunks = Map::new();
        chunks.insert(chunk_id, fake_chunk(chunk_id, doc, "Paris is the capital of France."));
        let store: Arc<dyn ChunkStore> = Arc::new(FakeStore { chunks: Mutex::new(chunks) });

        let embedder = StubEmbedder::new(8);
        let llm = StubLlmClient::responding("Paris [1].\n[1] doc:x p1-1");
        let scorer = FixedScorer(5.0);
        let config = RagConfig::default();

        let ctx = GraphContext::new(store, &embedder, &llm, &scorer, &config);
        let observer = RecordingObserver { seen: Mutex::new(Vec::new()) };
        let executor = GraphExecutor::new(ctx).with_observer(&observer);

        let mut state = GraphState::new("t4", "u4", "What is the capital of France?");
        executor.run(&mut state).await;

        let seen = observer.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &["planner", "retriever", "critic", "compressor", "synthesizer"]
        );
    }
}
