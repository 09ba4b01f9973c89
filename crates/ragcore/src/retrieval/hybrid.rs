//! Hybrid retriever.
//!
//! Executes independent lexical and vector selections against the chunk
//! store, normalizes each side into [0,1] with per-side min-max
//! normalization, and merges by chunk_id with an explicit 0.5/0.5 blend.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::CoreError;
use crate::store::ChunkStore;
use crate::types::{Candidate, RetrieveOptions};

const NORMALIZE_EPS: f32 = 1e-9;

#[derive(Default, Clone, Copy)]
struct MergedScore {
    lex_raw: Option<f32>,
    vec_distance: Option<f32>,
    lex_rank: Option<usize>,
    vec_rank: Option<usize>,
}

/// Remap cosine distance (range [0,2], as returned by an ANN index using
/// `distance = 1 - cosine_similarity`) into a [0,1] similarity score,
/// keeping identical vectors (distance 0) at 1.0. See DESIGN.md for the
/// derivation.
fn vec_similarity(distance: f32) -> f32 {
    ((2.0 - distance) / 2.0).clamp(0.0, 1.0)
}

/// Min-max normalize raw lexical scores into [0,1], eps-guarded against a
/// zero-width range.
fn normalize_minmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(NORMALIZE_EPS);
    scores.iter().map(|s| (s - min) / range).collect()
}

pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// `retrieve(lex_query, query_embedding, options) -> ordered candidates`
    ///. Empty result sets are not an error.
    pub async fn retrieve(
        &self,
        lex_query: &str,
        query_embedding: &[f32],
        options: &RetrieveOptions,
    ) -> Result<Vec<Candidate>, CoreError> {
        let doc_filter = options.doc_filter.as_deref();
        let doc_exclude = options.doc_exclude.as_deref();

        let lex_hits = self
            .store
            .lexical_search(lex_query, options.k_lex, doc_filter, doc_exclude)
            .await?;
        let vec_hits = self
            .store
            .vector_search(query_embedding, options.k_vec, doc_filter, doc_exclude)
            .await?;

        let lex_norm = normalize_minmax(
            &lex_hits.iter().map(|h| h.score).collect::<Vec<_>>(),
        );

        let mut merged: HashMap<Uuid, MergedScore> = HashMap::new();
        for (rank, (hit, norm)) in lex_hits.iter().zip(lex_norm.iter()).enumerate() {
            let entry = merged.entry(hit.chunk_id).or_default();
            entry.lex_raw = Some(*norm);
            entry.lex_rank = Some(rank);
        }
        for (rank, hit) in vec_hits.iter().enumerate() {
            let entry = merged.entry(hit.chunk_id).or_default();
            entry.vec_distance = Some(hit.cosine_distance);
            entry.vec_rank = Some(rank);
        }

        if merged.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<Uuid> = merged.keys().copied().collect();
        let chunks = self.store.get_chunks(&chunk_ids).await?;
        let chunk_by_id: HashMap<Uuid, _> = chunks.into_iter().map(|c| (c.chunk_id, c)).collect();

        let mut ranked: Vec<(Candidate, usize)> = Vec::with_capacity(merged.len());
        for (chunk_id, score) in merged {
            let Some(chunk) = chunk_by_id.get(&chunk_id) else {
                continue;
            };
            let s_lex = score.lex_raw.unwrap_or(0.0);
            let s_vec = score
                .vec_distance
                .map(vec_similarity)
                .unwrap_or(0.0);
            let best_rank = match (score.lex_rank, score.vec_rank) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => usize::MAX,
            };
            ranked.push((
                Candidate {
                    chunk_id,
                    doc_id: chunk.doc_id,
                    text: chunk.text.clone(),
                    page_start: chunk.page_start,
                    page_end: chunk.page_end,
                    s_lex,
                    s_vec,
                    s_ce: None,
                    embedding: chunk.embedding.clone(),
                },
                best_rank,
            ));
        }

        // Order by hybrid score desc; ties preserve the higher (lower-numbered)
        // of lexical/vector rank position.
        ranked.sort_by(|(a, a_rank), (b, b_rank)| {
            b.s_hyb()
                .partial_cmp(&a.s_hyb())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a_rank.cmp(b_rank))
        });
        ranked.truncate(options.k_out);

        Ok(ranked.into_iter().map(|(c, _)| c).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LexicalHit, VectorHit};
    use crate::types::{Chunk, ContentType, Document};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    struct FakeStore {
        lex: Vec<LexicalHit>,
        vec: Vec<VectorHit>,
        chunks: Mutex<Map<Uuid, Chunk>>,
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
            embedding: vec![1.0, 0.0],
            meta: Map::new(),
        }
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
            Ok(self.lex.clone())
        }

        async fn vector_search(
            &self,
            _query_embedding: &[f32],
            _k: usize,
            _doc_filter: Option<&[Uuid]>,
            _doc_exclude: Option<&[Uuid]>,
        ) -> Result<Vec<VectorHit>, CoreError> {
            Ok(self.vec.clone())
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
            2
        }
    }

    fn opts() -> RetrieveOptions {
        RetrieveOptions {
            k_lex: 40,
            k_vec: 40,
            k_out: 40,
            doc_filter: None,
            doc_exclude: None,
        }
    }

    #[tokio::test]
    async fn empty_store_returns_empty_not_error() {
        let store = Arc::new(FakeStore {
            lex: vec![],
            vec: vec![],
            chunks: Mutex::new(Map::new()),
        });
        let retriever = HybridRetriever::new(store);
        let result = retriever.retrieve("q", &[1.0, 0.0], &opts()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn chunk_in_only_one_list_defaults_missing_side_to_zero() {
        let doc_id = Uuid::new_v4();
        let chunk_id = Uuid::new_v4();
        let mut chunks = Map::new();
        chunks.insert(chunk_id, fake_chunk(chunk_id, doc_id, "hello world"));

        let store = Arc::new(FakeStore {
            lex: vec![LexicalHit { chunk_id, score: 1.0 }],
            vec: vec![],
            chunks: Mutex::new(chunks),
        });
        let retriever = HybridRetriever::new(store);
        let result = retriever.retrieve("hello", &[1.0, 0.0], &opts()).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].s_vec, 0.0);
    }

    #[tokio::test]
    async fn output_truncated_to_k_out_with_unique_ids() {
        let doc_id = Uuid::new_v4();
        let mut chunks = Map::new();
        let mut lex = Vec::new();
        for i in 0..10 {
            let id = Uuid::new_v4();
            chunks.insert(id, fake_chunk(id, doc_id, "text"));
            lex.push(LexicalHit {
                chunk_id: id,
                score: 10.0 - i as f32,
            });
        }
        let store = Arc::new(FakeStore {
            lex,
            vec: vec![],
            chunks: Mutex::new(chunks),
        });
        let retriever = HybridRetriever::new(store);
        let mut o = opts();
        o.k_out = 3;
        let result = retriever.retrieve("text", &[1.0, 0.0], &o).await.unwrap();
        assert_eq!(result.len(), 3);
        let ids: std::collections::HashSet<_> = result.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn distance_zero_maps_to_similarity_one() {
        assert!((vec_similarity(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn distance_two_maps_to_similarity_zero() {
        assert!((vec_similarity(2.0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_minmax_handles_uniform_scores() {
        let norm = normalize_minmax(&[0.5, 0.5, 0.5]);
        assert!(norm.iter().all(|v| *v == 0.0));
    }
}
