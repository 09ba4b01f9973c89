//! Two-stage cross-document merger. Used only when `cross_doc`
//! is set on the graph state.

use std::cmp::Ordering;
use std::collections::HashSet;

use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::error::CoreError;
use crate::retrieval::hybrid::HybridRetriever;
use crate::sanitizer::sanitize;
use crate::types::{Candidate, RetrieveOptions};

/// Deduplicate `primary` ahead of `expansion` by chunk_id, primary winning
/// ties, then keep the top `k_out` by hybrid score. Exposed separately from
/// `two_stage_retrieve` so idempotence is directly testable.
pub fn merge_primary_priority(
    primary: Vec<Candidate>,
    expansion: Vec<Candidate>,
    k_out: usize,
) -> Vec<Candidate> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut merged: Vec<Candidate> = Vec::with_capacity(primary.len() + expansion.len());
    for c in primary.into_iter().chain(expansion.into_iter()) {
        if seen.insert(c.chunk_id) {
            merged.push(c);
        }
    }
    merged.sort_by(|a, b| b.s_hyb().partial_cmp(&a.s_hyb()).unwrap_or(Ordering::Equal));
    merged.truncate(k_out);
    merged
}

/// Stage one (primary, scoped to `primary_doc_ids` if any) plus stage two
/// (expansion: original question + up to `expansion_chars` of stage-one
/// text, searched corpus-wide, excluding stage-one chunk_ids). When no
/// primary docs are given, stage one is skipped and stage two runs with the
/// unmodified question.
#[allow(clippy::too_many_arguments)]
pub async fn two_stage_retrieve(
    retriever: &HybridRetriever,
    embedder: &dyn Embedder,
    question: &str,
    question_embedding: &[f32],
    primary_doc_ids: &[Uuid],
    base_options: &RetrieveOptions,
    expansion_chars: usize,
) -> Result<Vec<Candidate>, CoreError> {
    let primary = if primary_doc_ids.is_empty() {
        Vec::new()
    } else {
        let lex = sanitize(question).lexical_query;
        let mut opts = base_options.clone();
        opts.doc_filter = Some(primary_doc_ids.to_vec());
        opts.doc_exclude = None;
        retriever.retrieve(&lex, question_embedding, &opts).await?
    };

    let primary_ids: HashSet<Uuid> = primary.iter().map(|c| c.chunk_id).collect();

    let mut expansion_query = question.to_string();
    let mut remaining_budget = expansion_chars;
    for c in &primary {
        if remaining_budget == 0 {
            break;
        }
        let take: String = c.text.chars().take(remaining_budget).collect();
        remaining_budget = remaining_budget.saturating_sub(take.chars().count());
        expansion_query.push(' ');
        expansion_query.push_str(&take);
    }

    let expansion_sanitized = sanitize(&expansion_query);
    let expansion_embedding = embedder.embed_text(&expansion_query).await?;

    let mut expansion_opts = base_options.clone();
    expansion_opts.doc_filter = None;
    expansion_opts.doc_exclude = None;

    let mut expansion = retriever
        .retrieve(
            &expansion_sanitized.lexical_query,
            &expansion_embedding,
            &expansion_opts,
        )
        .await?;
    // doc_exclude is document-scoped; chunk_ids already selected in stage one
    // are excluded by post-filtering the chunk-level id instead.
    expansion.retain(|c| !primary_ids.contains(&c.chunk_id));

    Ok(merge_primary_priority(primary, expansion, base_options.k_out))
}
