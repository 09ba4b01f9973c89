//! Graph node implementations: planner, retriever, compressor,
//! critic, refine_retrieve, synthesizer. Each node mutates a `GraphState` in
//! place; the executor decides routing between them.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::RagConfig;
use crate::confidence;
use crate::embeddings::Embedder;
use crate::error::CoreError;
use crate::llm::{ChatMessage, ChatRole, LlmClient};
use crate::reranking::reranker::{CrossEncoderScorer, Reranker};
use crate::retrieval::hybrid::HybridRetriever;
use crate::retrieval::mmr::mmr;
use crate::retrieval::two_stage::two_stage_retrieve;
use crate::sanitizer::sanitize;
use crate::store::ChunkStore;
use crate::types::{Action, GraphState, Refinement, RetrieveOptions};

use super::compressor;

/// Bundle of shared, per-query-invariant dependencies every node needs.
/// Constructed once by the executor and borrowed by every node call.
pub struct GraphContext<'a> {
    pub store: Arc<dyn ChunkStore>,
    pub retriever: HybridRetriever,
    pub embedder: &'a dyn Embedder,
    pub llm: &'a dyn LlmClient,
    pub scorer: &'a dyn CrossEncoderScorer,
    pub config: &'a RagConfig,
}

impl<'a> GraphContext<'a> {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: &'a dyn Embedder,
        llm: &'a dyn LlmClient,
        scorer: &'a dyn CrossEncoderScorer,
        config: &'a RagConfig,
    ) -> Self {
        let retriever = HybridRetriever::new(store.clone());
        Self {
            store,
            retriever,
            embedder,
            llm,
            scorer,
            config,
        }
    }
}

/// Fetch a single-document title plus a semantically-relevant preview
/// passage, for the planner to ground its plan against.
async fn doc_preview(ctx: &GraphContext<'_>, doc_id: Uuid) -> Option<(String, String)> {
    let doc = ctx.store.get_document(doc_id).await.ok().flatten()?;
    let title_embedding = ctx.embedder.embed_text(&doc.title).await.ok()?;
    let hits = ctx
        .store
        .vector_search(&title_embedding, 1, Some(&[doc_id]), None)
        .await
        .ok()?;
    let preview = match hits.first() {
        Some(hit) => ctx
            .store
            .get_chunks(&[hit.chunk_id])
            .await
            .ok()
            .and_then(|chunks| chunks.into_iter().next())
            .map(|c| c.text)
            .unwrap_or_default(),
        None => String::new(),
    };
    Some((doc.title, preview))
}

/// Planner: rewrite the raw question into a short, self-contained
/// search plan. Falls back to the question verbatim on LLM failure.
pub async fn plan(ctx: &GraphContext<'_>, state: &mut GraphState) {
    let doc_context = if state.target_doc_ids.len() == 1 {
        doc_preview(ctx, state.target_doc_ids[0]).await
    } else {
        None
    };

    let system_prompt = "You are a retrieval planning assistant. Restate the user's question \
        as a short, self-contained search plan of one or two sentences. Do not answer the \
        question and do not invent facts not present in the question.";

    let mut user_content = format!("Question: {}", state.question);
    if let Some((title, preview)) = &doc_context {
        user_content.push_str(&format!("\n\nTarget document: {title}\nPreview: {preview}"));
    }

    let messages = vec![ChatMessage {
        role: ChatRole::User,
        content: user_content,
    }];
    let response = ctx.llm.complete(system_prompt, &messages).await;

    state.plan = if response.trim().is_empty() {
        state.question.clone()
    } else {
        response.trim().to_string()
    };
}

/// Retriever: choose cross-doc/doc-filtered/unfiltered retrieval
/// strategy from `state.cross_doc`/`state.target_doc_ids`, rerank, then MMR
/// down to `k_critic`.
pub async fn retrieve(ctx: &GraphContext<'_>, state: &mut GraphState) -> Result<(), CoreError> {
    let sanitized = sanitize(&state.sub_query);
    let embedding = ctx.embedder.embed_text(&state.sub_query).await?;

    let base_opts = RetrieveOptions {
        k_lex: ctx.config.retrieval.k_lex,
        k_vec: ctx.config.retrieval.k_vec,
        k_out: ctx.config.retrieval.k_retriever,
        doc_filter: if state.target_doc_ids.is_empty() {
            None
        } else {
            Some(state.target_doc_ids.clone())
        },
        doc_exclude: None,
    };

    let merged = if state.cross_doc {
        two_stage_retrieve(
            &ctx.retriever,
            ctx.embedder,
            &state.sub_query,
            &embedding,
            &state.target_doc_ids,
            &base_opts,
            ctx.config.retrieval.expansion_chars,
        )
        .await?
    } else {
        ctx.retriever
            .retrieve(&sanitized.lexical_query, &embedding, &base_opts)
            .await?
    };

    let reranked = Reranker::new(ctx.scorer).rerank(&state.question, merged, ctx.config.retrieval.k_retriever);
    state.candidates = mmr(&reranked, ctx.config.retrieval.k_critic, ctx.config.retrieval.mmr_lambda);
    Ok(())
}

/// Compressor: build the evidence bundle the synthesizer will
/// see. Extractive only — never calls the LLM.
pub fn compress(ctx: &GraphContext<'_>, state: &GraphState) -> String {
    compressor::build_evidence_bundle(
        &state.candidates,
        &state.sub_query,
        ctx.config.synthesis.compression_budget_chars,
    )
}

/// Critic: score confidence over the current candidate set and
/// record the provisional action. Does not decide routing — the executor
/// combines `state.action` with the remaining iteration budget for that.
pub fn critic(ctx: &GraphContext<'_>, state: &mut GraphState) {
    if confidence::rerank_scores_absent(&state.candidates) {
        let (probability, action) = confidence::legacy_score(
            &state.candidates,
            state.has_explicit_doc_selection(),
            ctx.config.synthesis.default_threshold_pct,
            ctx.config.synthesis.explicit_selection_threshold_pct,
        );
        state.confidence = probability;
        state.action = Some(action);
    } else {
        let sanitized_terms = sanitize(&state.question).terms;
        let result = confidence::score(&state.candidates, &sanitized_terms, None, &ctx.config.confidence);
        state.confidence = result.probability;
        state.action = Some(result.action);
    }
}

/// Refine_retrieve: ask the LLM for a sub-query distinct from
/// every prior one; falls back to appending the top missing sanitized term
/// when the LLM fails or repeats a prior sub-query. Always advances
/// `state.iteration`.
pub async fn refine_retrieve(ctx: &GraphContext<'_>, state: &mut GraphState) {
    let previous_sub_query = state.sub_query.clone();
    let prior_sub_queries: HashSet<String> = std::iter::once(state.question.clone())
        .chain(state.refinements.iter().map(|r| r.new_sub_query.clone()))
        .collect();

    let evidence_snippet: String = state
        .candidates
        .iter()
        .take(3)
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");

    let system_prompt = "The retrieved evidence is insufficient. Propose one different, more \
        specific search query likely to surface the missing evidence. Reply with only the \
        new query, nothing else.";
    let user_content = format!(
        "Original question: {}\nCurrent sub-query: {}\nEvidence retrieved so far:\n{}",
        state.question, state.sub_query, evidence_snippet
    );
    let messages = vec![ChatMessage {
        role: ChatRole::User,
        content: user_content,
    }];
    let response = ctx.llm.complete(system_prompt, &messages).await;
    let proposed = response.trim().to_string();

    let (new_sub_query, used_fallback) = if proposed.is_empty() || prior_sub_queries.contains(&proposed) {
        let question_terms = sanitize(&state.question).terms;
        let used_terms: HashSet<String> = sanitize(&state.sub_query).terms.into_iter().collect();
        match question_terms.into_iter().find(|t| !used_terms.contains(t)) {
            Some(term) => (format!("{} {}", state.sub_query, term), true),
            None => (format!("{} additional details", state.sub_query), true),
        }
    } else {
        (proposed, false)
    };

    state.iteration += 1;
    state.refinements.push(Refinement {
        iteration: state.iteration,
        previous_sub_query,
        new_sub_query: new_sub_query.clone(),
        used_fallback,
    });
    state.sub_query = new_sub_query;
}

pub(crate) const ABSTAIN_ANSWER: &str = "I don't know.";

/// Synthesizer: a pre-LLM abstain check against the configured
/// percent threshold, then an LLM call over the compressed evidence with
/// citation instructions. Citations are pruned of unused markers afterward.
pub async fn synthesize(ctx: &GraphContext<'_>, state: &mut GraphState, evidence_bundle: &str) -> String {
    let percent = state.confidence * 100.0;
    let threshold = if state.has_explicit_doc_selection() {
        ctx.config.synthesis.explicit_selection_threshold_pct
    } else {
        ctx.config.synthesis.default_threshold_pct
    };

    if percent < threshold {
        state.action = Some(Action::Abstain);
        state.final_answer = Some(ABSTAIN_ANSWER.to_string());
        return ABSTAIN_ANSWER.to_string();
    }

    let system_prompt = "Answer the question using only the evidence provided below. Cite every \
        claim inline with its bracketed index, e.g. [1]. After the answer, list each citation \
        you used on its own line in the form `[N] doc:DOCID pSTART-END`. Do not cite evidence \
        you did not use.";
    let user_content = format!("Question: {}\n\nEvidence:\n{}", state.question, evidence_bundle);
    let messages = vec![ChatMessage {
        role: ChatRole::User,
        content: user_content,
    }];
    let response = ctx.llm.complete(system_prompt, &messages).await;

    let answer = if response.trim().is_empty() {
        state.action = Some(Action::Abstain);
        ABSTAIN_ANSWER.to_string()
    } else {
        crate::citation::prune(&response)
    };
    state.final_answer = Some(answer.clone());
    answer
}
