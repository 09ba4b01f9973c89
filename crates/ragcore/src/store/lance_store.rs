//! Concrete `ChunkStore` backed by LanceDB (vectors) and `TextIndex`
//! (lexical) as two independent engines, over a normalized
//! `documents`/`chunks` schema.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lancedb::query::{ExecutableQuery, QueryBase};
use uuid::Uuid;

use crate::error::CoreError;
use crate::store::text_index::TextIndex;
use crate::store::{ChunkStore, LexicalHit, VectorHit};
use crate::types::{Chunk, ContentType, Document};

const CHUNKS_TABLE: &str = "chunks";
const DOCUMENTS_TABLE: &str = "documents";
const SEED_ID: &str = "__seed__";

fn store_err(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::StoreUnavailable(format!("{context}: {e}"))
}

fn content_type_str(ct: ContentType) -> &'static str {
    match ct {
        ContentType::Text => "text",
        ContentType::Image => "image",
        ContentType::Multimodal => "multimodal",
        ContentType::PdfText => "pdf_text",
        ContentType::PdfImage => "pdf_image",
    }
}

fn content_type_from_str(s: &str) -> ContentType {
    match s {
        "image" => ContentType::Image,
        "multimodal" => ContentType::Multimodal,
        "pdf_text" => ContentType::PdfText,
        "pdf_image" => ContentType::PdfImage,
        _ => ContentType::Text,
    }
}

/// Quote a list of UUIDs into a SQL `IN (...)` fragment. UUIDs are
/// hyphenated hex, so no escaping is strictly needed, but we quote via
/// `to_string` only, never interpolating caller-controlled text.
fn id_in_list(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct LanceChunkStore {
    db: lancedb::Connection,
    dimension: usize,
    text_index: TextIndex,
}

impl LanceChunkStore {
    pub async fn open(path: &Path, dimension: usize) -> Result<Self, CoreError> {
        std::fs::create_dir_all(path)
            .map_err(|e| store_err("failed to create store directory", e))?;

        let lance_path = path.join("lancedb");
        let db = lancedb::connect(lance_path.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(|e| store_err("failed to connect to LanceDB", e))?;

        let text_index =
            TextIndex::open(path).map_err(|e| store_err("failed to open lexical index", e))?;

        let store = Self {
            db,
            dimension,
            text_index,
        };
        store.ensure_documents_table().await?;
        store.ensure_chunks_table().await?;
        tracing::info!(path = %path.display(), dimension, "opened LanceChunkStore");
        Ok(store)
    }

    fn chunks_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("doc_id", DataType::Utf8, false),
            Field::new("page_start", DataType::UInt32, false),
            Field::new("page_end", DataType::UInt32, false),
            Field::new("section", DataType::Utf8, true),
            Field::new("text", DataType::Utf8, false),
            Field::new("is_ocr", DataType::Boolean, false),
            Field::new("is_figure", DataType::Boolean, false),
            Field::new("content_type", DataType::Utf8, false),
            Field::new("image_path", DataType::Utf8, true),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("meta_json", DataType::Utf8, false),
        ]))
    }

    fn documents_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("doc_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("source_path", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("meta_json", DataType::Utf8, false),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn ensure_chunks_table(&self) -> Result<(), CoreError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| store_err("failed to list tables", e))?;
        if names.contains(&CHUNKS_TABLE.to_string()) {
            return Ok(());
        }

        let schema = self.chunks_schema();
        let values = Float32Array::from(vec![0.0f32; self.dimension]);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![SEED_ID])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![SEED_ID])),
                Arc::new(UInt32Array::from(vec![0u32])),
                Arc::new(UInt32Array::from(vec![0u32])),
                Arc::new(StringArray::from(vec![None::<&str>])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(BooleanArray::from(vec![false])),
                Arc::new(BooleanArray::from(vec![false])),
                Arc::new(StringArray::from(vec!["text"])),
                Arc::new(StringArray::from(vec![None::<&str>])),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec!["{}"])),
            ],
        )
        .map_err(|e| store_err("failed to build seed chunk batch", e))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(CHUNKS_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| store_err("failed to create chunks table", e))?;

        let table = self
            .db
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open chunks table", e))?;
        let _ = table.delete(&format!("chunk_id = '{SEED_ID}'")).await;
        Ok(())
    }

    async fn ensure_documents_table(&self) -> Result<(), CoreError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| store_err("failed to list tables", e))?;
        if names.contains(&DOCUMENTS_TABLE.to_string()) {
            return Ok(());
        }

        let schema = Self::documents_schema();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![SEED_ID])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec!["{}"])),
                Arc::new(Int64Array::from(vec![0i64])),
            ],
        )
        .map_err(|e| store_err("failed to build seed document batch", e))?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(DOCUMENTS_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| store_err("failed to create documents table", e))?;

        let table = self
            .db
            .open_table(DOCUMENTS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open documents table", e))?;
        let _ = table.delete(&format!("doc_id = '{SEED_ID}'")).await;
        Ok(())
    }

    fn doc_scope_predicate(doc_filter: Option<&[Uuid]>, doc_exclude: Option<&[Uuid]>) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(f) = doc_filter {
            if !f.is_empty() {
                clauses.push(format!("doc_id IN ({})", id_in_list(f)));
            }
        }
        if let Some(e) = doc_exclude {
            if !e.is_empty() {
                clauses.push(format!("doc_id NOT IN ({})", id_in_list(e)));
            }
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }
}

#[async_trait]
impl ChunkStore for LanceChunkStore {
    async fn lexical_search(
        &self,
        lex_query: &str,
        k: usize,
        doc_filter: Option<&[Uuid]>,
        doc_exclude: Option<&[Uuid]>,
    ) -> Result<Vec<LexicalHit>, CoreError> {
        let hits = self
            .text_index
            .search(lex_query, k, doc_filter, doc_exclude)
            .map_err(|e| store_err("lexical search failed", e))?;
        Ok(hits
            .into_iter()
            .map(|(chunk_id, score)| LexicalHit { chunk_id, score })
            .collect())
    }

    async fn vector_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        doc_filter: Option<&[Uuid]>,
        doc_exclude: Option<&[Uuid]>,
    ) -> Result<Vec<VectorHit>, CoreError> {
        let table = self
            .db
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open chunks table", e))?;

        let mut query = table
            .query()
            .nearest_to(query_embedding)
            .map_err(|e| store_err("failed to build vector query", e))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(predicate) = Self::doc_scope_predicate(doc_filter, doc_exclude) {
            query = query.only_if(predicate);
        }

        let results = query
            .execute()
            .await
            .map_err(|e| store_err("vector search failed", e))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| store_err("failed to collect vector search results", e))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            let (Some(ids), Some(distances)) = (ids, distances) else {
                continue;
            };
            for i in 0..batch.num_rows() {
                let Ok(chunk_id) = Uuid::parse_str(ids.value(i)) else {
                    continue;
                };
                if chunk_id.is_nil() {
                    continue;
                }
                hits.push(VectorHit {
                    chunk_id,
                    cosine_distance: distances.value(i),
                });
            }
        }
        Ok(hits)
    }

    async fn get_chunks(&self, chunk_ids: &[Uuid]) -> Result<Vec<Chunk>, CoreError> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self
            .db
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open chunks table", e))?;

        let mut chunks = Vec::with_capacity(chunk_ids.len());
        for batch_ids in chunk_ids.chunks(100) {
            let predicate = format!("chunk_id IN ({})", id_in_list(batch_ids));
            let results = table
                .query()
                .only_if(predicate)
                .execute()
                .await
                .map_err(|e| store_err("get_chunks query failed", e))?;
            let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
                .await
                .map_err(|e| store_err("failed to collect get_chunks results", e))?;
            chunks.extend(extract_chunks(&batches));
        }
        Ok(chunks)
    }

    async fn get_document(&self, doc_id: Uuid) -> Result<Option<Document>, CoreError> {
        let table = self
            .db
            .open_table(DOCUMENTS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open documents table", e))?;
        let predicate = format!("doc_id = '{doc_id}'");
        let results = table
            .query()
            .only_if(predicate)
            .limit(1)
            .execute()
            .await
            .map_err(|e| store_err("get_document query failed", e))?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| store_err("failed to collect get_document results", e))?;
        Ok(extract_documents(&batches).into_iter().next())
    }

    async fn insert_document(&self, doc: Document) -> Result<(), CoreError> {
        let table = self
            .db
            .open_table(DOCUMENTS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open documents table", e))?;

        let schema = Self::documents_schema();
        let meta_json = serde_json::to_string(&doc.meta).unwrap_or_else(|_| "{}".to_string());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![doc.doc_id.to_string()])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![doc.title])),
                Arc::new(StringArray::from(vec![doc.source_path])),
                Arc::new(StringArray::from(vec![doc.content_hash])),
                Arc::new(StringArray::from(vec![meta_json])),
                Arc::new(Int64Array::from(vec![doc.created_at.timestamp_millis()])),
            ],
        )
        .map_err(|e| store_err("failed to build document batch", e))?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| store_err("failed to insert document", e))?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), CoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        for c in &chunks {
            if c.embedding.len() != self.dimension {
                return Err(CoreError::Config(format!(
                    "chunk {} embedding width {} != configured dimension {}",
                    c.chunk_id,
                    c.embedding.len(),
                    self.dimension
                )));
            }
        }

        let table = self
            .db
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open chunks table", e))?;

        let schema = self.chunks_schema();
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.to_string()).collect();
        let doc_ids: Vec<String> = chunks.iter().map(|c| c.doc_id.to_string()).collect();
        let page_starts: Vec<u32> = chunks.iter().map(|c| c.page_start).collect();
        let page_ends: Vec<u32> = chunks.iter().map(|c| c.page_end).collect();
        let sections: Vec<Option<String>> = chunks.iter().map(|c| c.section.clone()).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let is_ocrs: Vec<bool> = chunks.iter().map(|c| c.is_ocr).collect();
        let is_figures: Vec<bool> = chunks.iter().map(|c| c.is_figure).collect();
        let content_types: Vec<&str> = chunks.iter().map(|c| content_type_str(c.content_type)).collect();
        let image_paths: Vec<Option<String>> = chunks.iter().map(|c| c.image_path.clone()).collect();
        let meta_jsons: Vec<String> = chunks
            .iter()
            .map(|c| serde_json::to_string(&c.meta).unwrap_or_else(|_| "{}".to_string()))
            .collect();

        let flat_vectors: Vec<f32> = chunks.iter().flat_map(|c| c.embedding.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(chunk_ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(doc_ids)),
                Arc::new(UInt32Array::from(page_starts)),
                Arc::new(UInt32Array::from(page_ends)),
                Arc::new(StringArray::from(sections)),
                Arc::new(StringArray::from(texts)),
                Arc::new(BooleanArray::from(is_ocrs)),
                Arc::new(BooleanArray::from(is_figures)),
                Arc::new(StringArray::from(content_types)),
                Arc::new(StringArray::from(image_paths)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(meta_jsons)),
            ],
        )
        .map_err(|e| store_err("failed to build chunk batch", e))?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| store_err("failed to insert chunks", e))?;

        for c in &chunks {
            self.text_index
                .index_chunk(c.chunk_id, c.doc_id, &c.text)
                .map_err(|e| store_err("failed to index chunk text", e))?;
        }
        self.text_index
            .commit()
            .map_err(|e| store_err("failed to commit lexical index", e))?;

        tracing::debug!(count = chunks.len(), "inserted chunks into LanceChunkStore");
        Ok(())
    }

    async fn delete_document(&self, doc_id: Uuid) -> Result<usize, CoreError> {
        let chunks_table = self
            .db
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open chunks table", e))?;
        let documents_table = self
            .db
            .open_table(DOCUMENTS_TABLE)
            .execute()
            .await
            .map_err(|e| store_err("failed to open documents table", e))?;

        let predicate = format!("doc_id = '{doc_id}'");
        let count_before = chunks_table.count_rows(None).await.unwrap_or(0);
        chunks_table
            .delete(&predicate)
            .await
            .map_err(|e| store_err("failed to delete chunks", e))?;
        let count_after = chunks_table.count_rows(None).await.unwrap_or(0);

        documents_table
            .delete(&predicate)
            .await
            .map_err(|e| store_err("failed to delete document", e))?;

        self.text_index
            .delete_by_doc_id(doc_id)
            .map_err(|e| store_err("failed to delete from lexical index", e))?;

        Ok(count_before.saturating_sub(count_after))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn extract_chunks(batches: &[RecordBatch]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for batch in batches {
        let chunk_ids = batch.column_by_name("chunk_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let doc_ids = batch.column_by_name("doc_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let page_starts = batch.column_by_name("page_start").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let page_ends = batch.column_by_name("page_end").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let sections = batch.column_by_name("section").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let is_ocrs = batch.column_by_name("is_ocr").and_then(|c| c.as_any().downcast_ref::<BooleanArray>());
        let is_figures = batch.column_by_name("is_figure").and_then(|c| c.as_any().downcast_ref::<BooleanArray>());
        let content_types = batch.column_by_name("content_type").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let image_paths = batch.column_by_name("image_path").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let meta_jsons = batch.column_by_name("meta_json").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let embeddings = batch.column_by_name("embedding").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

        let (Some(chunk_ids), Some(doc_ids), Some(texts)) = (chunk_ids, doc_ids, texts) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let Ok(chunk_id) = Uuid::parse_str(chunk_ids.value(i)) else {
                continue;
            };
            if chunk_id.is_nil() {
                continue;
            }
            let Ok(doc_id) = Uuid::parse_str(doc_ids.value(i)) else {
                continue;
            };

            let embedding = embeddings
                .map(|arr| {
                    let item = arr.value(i);
                    item.as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|v| v.values().to_vec())
                        .unwrap_or_default()
                })
                .unwrap_or_default();

            let meta: HashMap<String, serde_json::Value> = meta_jsons
                .map(|m| serde_json::from_str(m.value(i)).unwrap_or_default())
                .unwrap_or_default();

            chunks.push(Chunk {
                chunk_id,
                doc_id,
                page_start: page_starts.map(|p| p.value(i)).unwrap_or(0),
                page_end: page_ends.map(|p| p.value(i)).unwrap_or(0),
                section: sections.and_then(|s| {
                    if s.is_null(i) {
                        None
                    } else {
                        Some(s.value(i).to_string())
                    }
                }),
                text: texts.value(i).to_string(),
                is_ocr: is_ocrs.map(|b| b.value(i)).unwrap_or(false),
                is_figure: is_figures.map(|b| b.value(i)).unwrap_or(false),
                content_type: content_types
                    .map(|c| content_type_from_str(c.value(i)))
                    .unwrap_or(ContentType::Text),
                image_path: image_paths.and_then(|p| {
                    if p.is_null(i) {
                        None
                    } else {
                        Some(p.value(i).to_string())
                    }
                }),
                embedding,
                meta,
            });
        }
    }
    chunks
}

fn extract_documents(batches: &[RecordBatch]) -> Vec<Document> {
    let mut docs = Vec::new();
    for batch in batches {
        let doc_ids = batch.column_by_name("doc_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let titles = batch.column_by_name("title").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let source_paths = batch.column_by_name("source_path").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let content_hashes = batch.column_by_name("content_hash").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let meta_jsons = batch.column_by_name("meta_json").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let created_ats = batch.column_by_name("created_at").and_then(|c| c.as_any().downcast_ref::<Int64Array>());

        let (Some(doc_ids), Some(titles), Some(source_paths), Some(content_hashes)) =
            (doc_ids, titles, source_paths, content_hashes)
        else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let Ok(doc_id) = Uuid::parse_str(doc_ids.value(i)) else {
                continue;
            };
            if doc_id.is_nil() {
                continue;
            }
            let meta: HashMap<String, serde_json::Value> = meta_jsons
                .map(|m| serde_json::from_str(m.value(i)).unwrap_or_default())
                .unwrap_or_default();
            let created_at = created_ats
                .map(|c| {
                    Utc.timestamp_millis_opt(c.value(i))
                        .single()
                        .unwrap_or_else(Utc::now)
                })
                .unwrap_or_else(Utc::now);

            docs.push(Document {
                doc_id,
                title: titles.value(i).to_string(),
                source_path: source_paths.value(i).to_string(),
                content_hash: content_hashes.value(i).to_string(),
                meta,
                created_at,
            });
        }
    }
    docs
}
