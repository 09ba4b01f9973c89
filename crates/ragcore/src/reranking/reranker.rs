//! Reranker contract: `rerank(question, candidates, top_k) ->
//! candidates with s_ce populated, ordered by s_ce desc`.
//!
//! Per-pair failures fall back to the hybrid score rather than failing the
//! whole call. Ties are broken by the incoming
//! order, which already reflects hybrid rank — `Vec::sort_by` is stable so
//! this requires no extra bookkeeping.

use std::cmp::Ordering;

use crate::types::Candidate;

/// Narrow interface over a concrete cross-encoder model so the reranker can
/// be tested without loading ONNX weights.
pub trait CrossEncoderScorer: Send + Sync {
    /// Score a single (query, passage) pair. Higher is more relevant.
    fn score(&self, query: &str, text: &str) -> anyhow::Result<f32>;
}

impl CrossEncoderScorer for crate::reranking::cross_encoder::CrossEncoderReranker {
    fn score(&self, query: &str, text: &str) -> anyhow::Result<f32> {
        crate::reranking::cross_encoder::CrossEncoderReranker::score(self, query, text)
    }
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

pub struct Reranker<'a> {
    scorer: &'a dyn CrossEncoderScorer,
}

impl<'a> Reranker<'a> {
    pub fn new(scorer: &'a dyn CrossEncoderScorer) -> Self {
        Self { scorer }
    }

    /// Apply the cross-encoder over `(question, chunk.text)` pairs. `top_k`
    /// is clamped to the candidate count. Per-pair model failures fall back
    /// to `s_hyb`; the call as a whole never fails on that account.
    pub fn rerank(&self, question: &str, mut candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
        for c in &mut candidates {
            let fallback = c.s_hyb();
            let s_ce = match self.scorer.score(question, &c.text) {
                Ok(logit) => sigmoid(logit),
                Err(_) => fallback,
            };
            c.s_ce = Some(s_ce);
        }

        candidates.sort_by(|a, b| {
            b.s_ce
                .unwrap_or(0.0)
                .partial_cmp(&a.s_ce.unwrap_or(0.0))
                .unwrap_or(Ordering::Equal)
        });

        let k = top_k.min(candidates.len());
        candidates.truncate(k);
        candidates
    }
}
