//! Extractive evidence compression.
//!
//! Splits each chunk into sentences, scores them by query-term overlap
//! plus a mild preference for earlier sentences, and keeps the top-scoring
//! ones in original order. Extractive only — no generative summarization.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::types::Candidate;

static SENTENCE_SPLIT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?<=[.!?])\s+(?=[A-Z\d])").expect("sentence split regex is valid")
});

const MAX_SENTENCES_PER_CHUNK: usize = 5;

fn split_sentences(text: &str) -> Vec<&str> {
    if text.contains('\n') && text.lines().count() > 3 {
        let lines: Vec<&str> = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() >= 3 {
            return lines;
        }
    }
    SENTENCE_SPLIT_RE.split(text).filter(|s| !s.is_empty()).collect()
}

fn query_terms(query: &str) -> HashSet<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn score_sentence(sentence: &str, terms: &HashSet<String>, idx: usize, total: usize) -> f32 {
    let lower = sentence.to_lowercase();
    let overlap = terms.iter().filter(|t| lower.contains(t.as_str())).count() as f32;
    let position_bonus = if total <= 1 {
        0.0
    } else {
        1.0 - (idx as f32 / (total - 1) as f32) * 0.2
    };
    overlap + position_bonus
}

/// Extract the top `max_sentences` query-relevant sentences from `chunk`,
/// preserving their original order. Short chunks pass through unchanged.
pub fn compress_chunk(chunk: &str, query: &str, max_sentences: usize) -> String {
    let chunk = chunk.trim();
    if chunk.is_empty() {
        return String::new();
    }

    let sentences = split_sentences(chunk);
    if sentences.len() <= max_sentences {
        return chunk.to_string();
    }

    let terms = query_terms(query);
    let mut scored: Vec<(usize, f32)> = sentences
        .iter()
        .enumerate()
        .map(|(idx, s)| (idx, score_sentence(s, &terms, idx, sentences.len())))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<usize> = scored.into_iter().take(max_sentences).map(|(i, _)| i).collect();
    selected.sort_unstable();

    selected.iter().map(|&i| sentences[i]).collect::<Vec<_>>().join(" ")
}

/// Build the evidence bundle the synthesizer sees: each candidate's
/// compressed text prefixed `[index] doc:DOCID p{start}-{end}`, bounded by
/// `budget_chars` total.
pub fn build_evidence_bundle(candidates: &[Candidate], query: &str, budget_chars: usize) -> String {
    let mut bundle = String::new();
    for (i, c) in candidates.iter().enumerate() {
        let compressed = compress_chunk(&c.text, query, MAX_SENTENCES_PER_CHUNK);
        if compressed.is_empty() {
            continue;
        }
        let entry = format!(
            "[{idx}] doc:{doc} p{start}-{end}\n{text}\n\n",
            idx = i + 1,
            doc = c.doc_id,
            start = c.page_start,
            end = c.page_end,
            text = compressed
        );
        if bundle.len() + entry.len() > budget_chars {
            let remaining = budget_chars.saturating_sub(bundle.len());
            bundle.push_str(&entry.chars().take(remaining).collect::<String>());
            break;
        }
        bundle.push_str(&entry);
    }
    bundle
}
