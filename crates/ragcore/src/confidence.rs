//! Confidence scorer.
//!
//! A pure function of the final reranked candidate set, the sanitized query
//! terms, and an optional provisional answer: computes the ten-feature
//! vector, aggregates it through a logistic weight vector into a
//! probability, and maps that probability to an action via the configured
//! thresholds. A legacy fallback covers callers that never ran rerank.

use std::collections::HashSet;

use crate::config::ConfidenceConfig;
use crate::types::{Action, Candidate};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceFeatures {
    pub max_rerank: f32,
    pub margin: f32,
    pub mean_cosine: f32,
    pub cosine_std: f32,
    pub cos_coverage: f32,
    pub bm25_norm: f32,
    pub term_coverage: f32,
    pub unique_page_frac: f32,
    pub doc_diversity: f32,
    pub answer_overlap: f32,
}

impl ConfidenceFeatures {
    fn as_array(&self) -> [f32; 10] {
        [
            self.max_rerank,
            self.margin,
            self.mean_cosine,
            self.cosine_std,
            self.cos_coverage,
            self.bm25_norm,
            self.term_coverage,
            self.unique_page_frac,
            self.doc_diversity,
            self.answer_overlap,
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceResult {
    pub probability: f32,
    pub action: Action,
    pub features: ConfidenceFeatures,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Compute the ten features over the final reranked set.
/// `sanitized_terms` drives f7; `provisional_answer` drives f10 (0.0 when
/// `None`).
pub fn compute_features(
    candidates: &[Candidate],
    sanitized_terms: &[String],
    provisional_answer: Option<&str>,
    cosine_coverage_floor: f32,
) -> ConfidenceFeatures {
    if candidates.is_empty() {
        return ConfidenceFeatures::default();
    }

    let n = candidates.len() as f32;

    let mut s_ce: Vec<f32> = candidates.iter().map(|c| c.s_final()).collect();
    s_ce.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let max_rerank = s_ce[0];
    let margin = if s_ce.len() >= 2 { s_ce[0] - s_ce[1] } else { 0.0 };

    let mean_cosine = candidates.iter().map(|c| c.s_vec).sum::<f32>() / n;
    let variance = candidates
        .iter()
        .map(|c| (c.s_vec - mean_cosine).powi(2))
        .sum::<f32>()
        / n;
    let cosine_std = variance.sqrt();

    let cos_coverage = candidates
        .iter()
        .filter(|c| c.s_vec >= cosine_coverage_floor)
        .count() as f32
        / n;

    let bm25_norm = candidates.iter().map(|c| c.s_lex).sum::<f32>() / n;

    let term_coverage = if sanitized_terms.is_empty() {
        0.0
    } else {
        let combined_lower: String = candidates
            .iter()
            .map(|c| c.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let covered = sanitized_terms
            .iter()
            .filter(|t| combined_lower.contains(t.to_lowercase().as_str()))
            .count();
        covered as f32 / sanitized_terms.len() as f32
    };

    let unique_pages: HashSet<(uuid::Uuid, u32)> =
        candidates.iter().map(|c| (c.doc_id, c.page_start)).collect();
    let unique_page_frac = unique_pages.len() as f32 / n;

    let unique_docs: HashSet<uuid::Uuid> = candidates.iter().map(|c| c.doc_id).collect();
    let doc_diversity = unique_docs.len() as f32 / n;

    let answer_overlap = match provisional_answer {
        Some(answer) if !answer.trim().is_empty() => {
            let answer_tokens = tokenize(answer);
            let combined_text: String = candidates
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let context_tokens = tokenize(&combined_text);
            jaccard(&answer_tokens, &context_tokens)
        }
        _ => 0.0,
    };

    ConfidenceFeatures {
        max_rerank,
        margin,
        mean_cosine,
        cosine_std,
        cos_coverage,
        bm25_norm,
        term_coverage,
        unique_page_frac,
        doc_diversity,
        answer_overlap,
    }
}

/// Aggregate features into a probability and action. `config`
/// supplies `weights` (w0 intercept + w1..w10) and the abstain/clarify
/// thresholds.
pub fn score(
    candidates: &[Candidate],
    sanitized_terms: &[String],
    provisional_answer: Option<&str>,
    config: &ConfidenceConfig,
) -> ConfidenceResult {
    let features = compute_features(
        candidates,
        sanitized_terms,
        provisional_answer,
        config.cosine_coverage_floor,
    );

    let w = &config.weights;
    let logit: f32 = w[0]
        + features
            .as_array()
            .iter()
            .zip(w[1..].iter())
            .map(|(f, wi)| f * wi)
            .sum::<f32>();
    let probability = sigmoid(logit);

    let action = if probability < config.abstain_th {
        Action::Abstain
    } else if probability < config.clarify_th {
        Action::Clarify
    } else {
        Action::Answer
    };

    ConfidenceResult {
        probability,
        action,
        features,
    }
}

/// Legacy fallback: used when rerank scores are entirely
/// absent (every candidate carries `s_ce = None`, i.e. the reranker was
/// never invoked). Confidence reduces to `100 * max(s_final)` percent,
/// compared against a percent threshold that depends on whether docs were
/// explicitly selected/uploaded.
pub fn legacy_score(
    candidates: &[Candidate],
    explicit_doc_selection: bool,
    default_threshold_pct: f32,
    explicit_selection_threshold_pct: f32,
) -> (f32, Action) {
    let max_s_final = candidates
        .iter()
        .map(|c| c.s_final())
        .fold(0.0f32, f32::max);
    let percent = 100.0 * max_s_final;
    let threshold = if explicit_doc_selection {
        explicit_selection_threshold_pct
    } else {
        default_threshold_pct
    };
    let action = if percent < threshold {
        Action::Abstain
    } else {
        Action::Answer
    };
    (max_s_final, action)
}

/// True when every candidate has no rerank score — the condition under
/// which `score` should be bypassed in favor of `legacy_score`.
pub fn rerank_scores_absent(candidates: &[Candidate]) -> bool {
    !candidates.is_empty() && candidates.iter().all(|c| c.s_ce.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use uuid::Uuid;

    fn candidate(doc_id: Uuid, page: u32, s_lex: f32, s_vec: f32, s_ce: f32, text: &str) -> Candidate {
        Candidate {
            chunk_id: Uuid::new_v4(),
            doc_id,
            text: text.into(),
            page_start: page,
            page_end: page,
            s_lex,
            s_vec,
            s_ce: Some(s_ce),
            embedding: vec![],
        }
    }

    #[test]
    fn probability_is_always_in_unit_interval() {
        let cfg = RagConfig::default().confidence;
        let doc = Uuid::new_v4();
        let cands = vec![candidate(doc, 1, 0.9, 0.9, 0.9, "quadratic curve")];
        let result = score(&cands, &["curve".to_string()], None, &cfg);
        assert!(result.probability > 0.0 && result.probability < 1.0);
    }

    #[test]
    fn empty_candidates_yields_zero_features_and_sigmoid_of_intercept() {
        let cfg = RagConfig::default().confidence;
        let result = score(&[], &[], None, &cfg);
        assert_eq!(result.features, ConfidenceFeatures::default());
        let expected = 1.0 / (1.0 + (-cfg.weights[0]).exp());
        assert!((result.probability - expected).abs() < 1e-6);
        assert_eq!(result.action, Action::Abstain);
    }

    #[test]
    fn all_chunks_from_one_document_gives_min_doc_diversity() {
        let cfg = RagConfig::default().confidence;
        let doc = Uuid::new_v4();
        let cands = vec![
            candidate(doc, 1, 0.5, 0.5, 0.5, "a"),
            candidate(doc, 2, 0.5, 0.5, 0.5, "b"),
        ];
        let result = score(&cands, &[], None, &cfg);
        assert!((result.features.doc_diversity - 0.5).abs() < 1e-6);
        assert!(result.features.unique_page_frac <= 1.0);
    }

    #[test]
    fn only_stop_words_yields_zero_term_coverage() {
        let cfg = RagConfig::default().confidence;
        let doc = Uuid::new_v4();
        let cands = vec![candidate(doc, 1, 0.5, 0.5, 0.5, "some text")];
        let result = score(&cands, &[], None, &cfg);
        assert_eq!(result.features.term_coverage, 0.0);
    }

    #[test]
    fn margin_is_zero_with_fewer_than_two_candidates() {
        let cfg = RagConfig::default().confidence;
        let doc = Uuid::new_v4();
        let cands = vec![candidate(doc, 1, 0.5, 0.5, 0.77, "x")];
        let result = score(&cands, &[], None, &cfg);
        assert_eq!(result.features.margin, 0.0);
        assert_eq!(result.features.max_rerank, 0.77);
    }

    #[test]
    fn is_pure_function_of_inputs() {
        let cfg = RagConfig::default().confidence;
        let doc = Uuid::new_v4();
        let cands = vec![candidate(doc, 1, 0.5, 0.6, 0.7, "orbital mechanics")];
        let r1 = score(&cands, &["orbital".to_string()], Some("orbital answer"), &cfg);
        let r2 = score(&cands, &["orbital".to_string()], Some("orbital answer"), &cfg);
        assert_eq!(r1.probability, r2.probability);
        assert_eq!(r1.features, r2.features);
    }

    #[test]
    fn legacy_fallback_triggers_only_when_rerank_entirely_absent() {
        let doc = Uuid::new_v4();
        let mut c = candidate(doc, 1, 0.5, 0.5, 0.5, "x");
        c.s_ce = None;
        assert!(rerank_scores_absent(&[c.clone()]));

        c.s_ce = Some(0.5);
        assert!(!rerank_scores_absent(&[c]));
    }

    #[test]
    fn legacy_score_uses_explicit_selection_threshold_when_docs_chosen() {
        let doc = Uuid::new_v4();
        // s_hyb = 0.5*0.35 + 0.5*0.35 = 0.35 -> 35%: between the two thresholds.
        let mut c = candidate(doc, 1, 0.35, 0.35, 0.0, "x");
        c.s_ce = None; // s_final falls back to s_hyb
        let (_, action_explicit) = legacy_score(&[c.clone()], true, 40.0, 30.0);
        let (_, action_default) = legacy_score(&[c], false, 40.0, 30.0);
        assert_eq!(action_explicit, Action::Answer);
        assert_eq!(action_default, Action::Abstain);
    }
}
