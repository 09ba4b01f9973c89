//! MMR diversifier.
//!
//! Greedy maximal marginal relevance over dense embeddings. Deterministic
//! given identical input ordering: ties in the per-step score are broken by
//! the candidate's position in the input slice.

use crate::types::Candidate;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Select `target_k` candidates (or all of them, whichever is fewer) trading
/// relevance against novelty. `lambda` weights relevance; `1 - lambda`
/// weights the penalty for similarity to already-selected items.
pub fn mmr(candidates: &[Candidate], target_k: usize, lambda: f32) -> Vec<Candidate> {
    let k = target_k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k);

    while selected.len() < k {
        let mut best_idx_pos = 0usize;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &i) in remaining.iter().enumerate() {
            let relevance = candidates[i].s_final();
            let max_sim = selected
                .iter()
                .map(|&j| cosine(&candidates[i].embedding, &candidates[j].embedding))
                .fold(f32::NEG_INFINITY, f32::max);
            let max_sim = if selected.is_empty() { 0.0 } else { max_sim };
            let score = lambda * relevance - (1.0 - lambda) * max_sim;

            if score > best_score {
                best_score = score;
                best_idx_pos = pos;
            }
        }

        let chosen = remaining.remove(best_idx_pos);
        selected.push(chosen);
    }

    selected.into_iter().map(|i| candidates[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(s_ce: f32, embedding: Vec<f32>) -> Candidate {
        Candidate {
            chunk_id: Uuid::new_v4(),
            doc_id: Uuid::new_v4(),
            text: "text".into(),
            page_start: 1,
            page_end: 1,
            s_lex: 0.0,
            s_vec: 0.0,
            s_ce: Some(s_ce),
            embedding,
        }
    }

    #[test]
    fn result_size_is_min_target_and_input_len() {
        let cands = vec![candidate(0.9, vec![1.0, 0.0]), candidate(0.8, vec![0.0, 1.0])];
        assert_eq!(mmr(&cands, 5, 0.7).len(), 2);
        assert_eq!(mmr(&cands, 1, 0.7).len(), 1);
        assert_eq!(mmr(&cands, 0, 0.7).len(), 0);
    }

    #[test]
    fn no_duplicates_in_result() {
        let cands = vec![
            candidate(0.9, vec![1.0, 0.0]),
            candidate(0.85, vec![0.99, 0.01]),
            candidate(0.8, vec![0.0, 1.0]),
        ];
        let result = mmr(&cands, 3, 0.7);
        let ids: std::collections::HashSet<_> = result.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn prefers_diverse_candidate_over_near_duplicate_relevant_one() {
        // b is near-duplicate of a (high cosine) but slightly more relevant than c;
        // with lambda favoring diversity-ish weighting, c should still be picked
        // second since b's marginal value collapses once a is selected.
        let a = candidate(0.95, vec![1.0, 0.0]);
        let b = candidate(0.90, vec![0.999, 0.001]);
        let c = candidate(0.70, vec![0.0, 1.0]);
        let cands = vec![a, b, c];
        let result = mmr(&cands, 2, 0.5);
        assert_eq!(result.len(), 2);
        // first pick is always the highest relevance
        assert!((result[0].s_final() - 0.95).abs() < 1e-6);
        // second pick should be the diverse one, not the near-duplicate
        assert!((result[1].s_final() - 0.70).abs() < 1e-6);
    }

    #[test]
    fn deterministic_given_identical_input() {
        let cands = vec![candidate(0.9, vec![1.0, 0.0]), candidate(0.8, vec![0.0, 1.0])];
        let r1 = mmr(&cands, 2, 0.7);
        let r2 = mmr(&cands, 2, 0.7);
        let ids1: Vec<_> = r1.iter().map(|c| c.chunk_id).collect();
        let ids2: Vec<_> = r2.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids1, ids2);
    }
}
