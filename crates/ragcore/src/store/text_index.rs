//! Lexical (BM25/trigram-style) index over chunk text, backed by Tantivy.
//!
//! Tantivy's default query scoring is BM25. Schema uses a `STRING | STORED`
//! id field so deletes work, with separate writer/reader handles and an
//! over-fetch-then-filter approach for doc-scoped search.

use anyhow::{Context, Result};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, STORED, STRING, TEXT, Value as TantivyValue};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use uuid::Uuid;

pub struct TextIndex {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    text_field: schema::Field,
    doc_id_field: schema::Field,
}

impl TextIndex {
    fn build_schema() -> (Schema, schema::Field, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        let doc_id_field = sb.add_text_field("doc_id", STRING | STORED);
        (sb.build(), id_field, text_field, doc_id_field)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let index_path = path.join("tantivy_index");
        std::fs::create_dir_all(&index_path).ok();

        let (schema, id_field, text_field, doc_id_field) = Self::build_schema();

        let dir = tantivy::directory::MmapDirectory::open(&index_path)?;
        let index = if Index::exists(&dir)? {
            Index::open_in_dir(&index_path)?
        } else {
            Index::create_in_dir(&index_path, schema)?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("failed to create tantivy reader")?;

        let writer = index
            .writer(50_000_000)
            .context("failed to create tantivy writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            id_field,
            text_field,
            doc_id_field,
        })
    }

    pub fn index_chunk(&self, chunk_id: Uuid, doc_id: Uuid, text: &str) -> Result<()> {
        let writer = self.writer.lock();
        writer.add_document(doc!(
            self.id_field => chunk_id.to_string(),
            self.text_field => text,
            self.doc_id_field => doc_id.to_string(),
        ))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit().context("tantivy commit failed")?;
        self.reader.reload()?;
        Ok(())
    }

    /// Search returning (chunk_id, bm25_score) pairs, optionally scoped to
    /// `doc_filter` (keep only) or `doc_exclude` (drop). Over-fetches when
    /// a scope is active to compensate for post-filter reduction.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        doc_filter: Option<&[Uuid]>,
        doc_exclude: Option<&[Uuid]>,
    ) -> Result<Vec<(Uuid, f32)>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);

        let parsed_query = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                let escaped = query.replace('"', "");
                query_parser.parse_query(&format!("\"{escaped}\""))?
            }
        };

        let scoped = doc_filter.is_some() || doc_exclude.is_some();
        let fetch_limit = if scoped { k * 4 + 16 } else { k };
        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(fetch_limit))?;

        let mut results = Vec::with_capacity(k);
        for (score, addr) in top_docs {
            let Ok(tdoc) = searcher.doc::<TantivyDocument>(addr) else {
                continue;
            };
            let Some(id_str) = tdoc.get_first(self.id_field).and_then(|v| v.as_str()) else {
                continue;
            };
            let Ok(chunk_id) = Uuid::parse_str(id_str) else {
                continue;
            };

            if let Some(filter) = doc_filter {
                let doc_id_str = tdoc
                    .get_first(self.doc_id_field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let Ok(doc_id) = Uuid::parse_str(doc_id_str) else {
                    continue;
                };
                if !filter.contains(&doc_id) {
                    continue;
                }
            }
            if let Some(exclude) = doc_exclude {
                let doc_id_str = tdoc
                    .get_first(self.doc_id_field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if let Ok(doc_id) = Uuid::parse_str(doc_id_str) {
                    if exclude.contains(&doc_id) {
                        continue;
                    }
                }
            }

            results.push((chunk_id, score));
            if results.len() >= k {
                break;
            }
        }

        Ok(results)
    }

    pub fn delete_chunk(&self, chunk_id: Uuid) -> Result<()> {
        let writer = self.writer.lock();
        let term = tantivy::Term::from_field_text(self.id_field, &chunk_id.to_string());
        writer.delete_term(term);
        Ok(())
    }

    pub fn delete_by_doc_id(&self, doc_id: Uuid) -> Result<()> {
        self.reader.reload().ok();
        let searcher = self.reader.searcher();
        let mut writer = self.writer.lock();
        let target = doc_id.to_string();

        for segment_reader in searcher.segment_readers() {
            let store_reader = segment_reader.get_store_reader(64)?;
            for doc_id_in_seg in 0..segment_reader.max_doc() {
                if segment_reader.is_deleted(doc_id_in_seg) {
                    continue;
                }
                if let Ok(tdoc) = store_reader.get::<TantivyDocument>(doc_id_in_seg) {
                    let matches = tdoc
                        .get_first(self.doc_id_field)
                        .and_then(|v| v.as_str())
                        .map(|s| s == target)
                        .unwrap_or(false);
                    if matches {
                        if let Some(id_str) = tdoc.get_first(self.id_field).and_then(|v| v.as_str()) {
                            let term = tantivy::Term::from_field_text(self.id_field, id_str);
                            writer.delete_term(term);
                        }
                    }
                }
            }
        }
        writer.commit().context("tantivy commit after delete failed")?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}
