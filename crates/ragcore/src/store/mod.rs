//! Chunk store abstraction.
//!
//! A store with dense vector columns (cosine, ANN-indexed), lexical
//! similarity operators, and UUID primary keys with referential cascade.
//! `ChunkStore` is the narrow trait the retriever and tracker program
//! against; `LanceChunkStore` is the concrete implementation, backing it
//! with LanceDB for vectors and Tantivy for lexical search as two
//! independent engines.

pub mod lance_store;
pub mod text_index;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{Chunk, Document};

pub use lance_store::LanceChunkStore;

/// A lexical hit: chunk_id and an unnormalized similarity score.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: Uuid,
    pub score: f32,
}

/// A vector hit: chunk_id and cosine distance in [0,2] (not yet remapped).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: Uuid,
    pub cosine_distance: f32,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Trigram/BM25-style lexical ranking against `chunks.text`, filtered by
    /// `doc_filter`/`doc_exclude` when given. Returns up to `k` hits, raw
    /// (unnormalized) scores — the caller normalizes.
    async fn lexical_search(
        &self,
        lex_query: &str,
        k: usize,
        doc_filter: Option<&[Uuid]>,
        doc_exclude: Option<&[Uuid]>,
    ) -> Result<Vec<LexicalHit>, CoreError>;

    /// Cosine-ANN ranking against `chunks.emb`. Returns up to `k` hits with
    /// raw cosine distance — the caller remaps to similarity.
    async fn vector_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        doc_filter: Option<&[Uuid]>,
        doc_exclude: Option<&[Uuid]>,
    ) -> Result<Vec<VectorHit>, CoreError>;

    /// Fetch full chunk rows for a set of chunk_ids, in no particular order.
    async fn get_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Chunk>, CoreError>;

    /// Fetch a document by id.
    async fn get_document(&self, doc_id: Uuid) -> Result<Option<Document>, CoreError>;

    async fn insert_document(&self, doc: Document) -> Result<(), CoreError>;

    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), CoreError>;

    /// Cascading delete: removes the document and all of its chunks.
    async fn delete_document(&self, doc_id: Uuid) -> Result<usize, CoreError>;

    fn dimension(&self) -> usize;
}
