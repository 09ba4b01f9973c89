//! Thread tracker.
//!
//! Records one row per query: inserted synchronously before the graph runs,
//! updated synchronously before the answer is returned to the caller.
//! Backed by `sqlx`/SQLite, using a WAL-mode connection pool and raw
//! `query(...).bind(...)` calls rather than the compile-time-checked
//! `query!`/`query_as!` macros.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::{EntryPointLabel, GraphState, PipelineTypeLabel, ThreadRecord, ThreadSummary};

fn tracker_err(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::StoreUnavailable(format!("thread tracker {context}: {e}"))
}

fn entry_point_str(e: EntryPointLabel) -> &'static str {
    match e {
        EntryPointLabel::Cli => "cli",
        EntryPointLabel::Rest => "rest",
        EntryPointLabel::Make => "make",
        EntryPointLabel::Toml => "toml",
    }
}

fn entry_point_from_str(s: &str) -> EntryPointLabel {
    match s {
        "rest" => EntryPointLabel::Rest,
        "make" => EntryPointLabel::Make,
        "toml" => EntryPointLabel::Toml,
        _ => EntryPointLabel::Cli,
    }
}

fn pipeline_type_str(p: PipelineTypeLabel) -> &'static str {
    match p {
        PipelineTypeLabel::Direct => "direct",
        PipelineTypeLabel::Langgraph => "langgraph",
    }
}

fn pipeline_type_from_str(s: &str) -> PipelineTypeLabel {
    match s {
        "langgraph" => PipelineTypeLabel::Langgraph,
        _ => PipelineTypeLabel::Direct,
    }
}

fn doc_ids_to_json(ids: &[Uuid]) -> String {
    serde_json::to_string(&ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()).unwrap_or_else(|_| "[]".into())
}

fn doc_ids_from_json(s: &str) -> Vec<Uuid> {
    serde_json::from_str::<Vec<String>>(s)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| Uuid::parse_str(&s).ok())
        .collect()
}

pub struct ThreadTracker {
    pool: SqlitePool,
}

impl ThreadTracker {
    /// Open (creating if missing) the SQLite database at `db_path` and
    /// ensure the `thread_tracking` table exists.
    pub async fn open(db_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| tracker_err("create db directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| tracker_err("parse connection options", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| tracker_err("connect", e))?;

        let tracker = Self { pool };
        tracker.ensure_schema().await?;
        Ok(tracker)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thread_tracking (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                doc_ids TEXT NOT NULL,
                query_text TEXT NOT NULL,
                final_answer TEXT,
                graphstate TEXT,
                ingestion_meta TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER,
                entry_point TEXT NOT NULL,
                pipeline_type TEXT NOT NULL,
                cross_doc INTEGER NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| tracker_err("create schema", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_thread_tracking_user ON thread_tracking (user_id, thread_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| tracker_err("create index", e))?;

        Ok(())
    }

    /// Insert a row before the graph runs. Returns the row id used by `update_on_completion`.
    pub async fn insert_on_start(
        &self,
        user_id: &str,
        thread_id: &str,
        doc_ids: &[Uuid],
        query_text: &str,
        entry_point: EntryPointLabel,
        pipeline_type: PipelineTypeLabel,
        cross_doc: bool,
    ) -> Result<i64, CoreError> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            r#"
            INSERT INTO thread_tracking
                (user_id, thread_id, doc_ids, query_text, ingestion_meta,
                 created_at, entry_point, pipeline_type, cross_doc, archived, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(thread_id)
        .bind(doc_ids_to_json(doc_ids))
        .bind(query_text)
        .bind("{}")
        .bind(now)
        .bind(entry_point_str(entry_point))
        .bind(pipeline_type_str(pipeline_type))
        .bind(cross_doc as i64)
        .bind("{}")
        .execute(&self.pool)
        .await
        .map_err(|e| tracker_err("insert", e))?;

        Ok(row.last_insert_rowid())
    }

    /// Record the finished query. `graphstate` is stored for later dataset extraction.
    pub async fn update_on_completion(
        &self,
        record_id: i64,
        final_answer: &str,
        graphstate: &GraphState,
        metadata: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), CoreError> {
        let now = Utc::now().timestamp_millis();
        let graphstate_json = serde_json::to_string(graphstate).unwrap_or_else(|_| "null".into());
        let metadata_json = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".into());

        sqlx::query(
            r#"
            UPDATE thread_tracking
            SET final_answer = ?, graphstate = ?, completed_at = ?, metadata = ?
            WHERE id = ?
            "#,
        )
        .bind(final_answer)
        .bind(graphstate_json)
        .bind(now)
        .bind(metadata_json)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(|e| tracker_err("update", e))?;

        Ok(())
    }

    /// List a user's threads, most recently active first. Archived threads
    /// are excluded unless `include_archived` is set.
    pub async fn list_threads(
        &self,
        user_id: &str,
        limit: i64,
        include_archived: bool,
    ) -> Result<Vec<ThreadSummary>, CoreError> {
        let query = if include_archived {
            r#"
            SELECT id, thread_id, query_text, final_answer, created_at, completed_at, archived
            FROM thread_tracking
            WHERE user_id = ?
            ORDER BY COALESCE(completed_at, created_at) DESC
            LIMIT ?
            "#
        } else {
            r#"
            SELECT id, thread_id, query_text, final_answer, created_at, completed_at, archived
            FROM thread_tracking
            WHERE user_id = ? AND archived = 0
            ORDER BY COALESCE(completed_at, created_at) DESC
            LIMIT ?
            "#
        };

        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| tracker_err("list", e))?;

        Ok(rows.iter().map(row_to_summary).collect())
    }

    /// Fetch a single thread record by (user_id, thread_id), most recent
    /// query on that thread.
    pub async fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<Option<ThreadRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, thread_id, doc_ids, query_text, final_answer, graphstate,
                   ingestion_meta, created_at, completed_at, entry_point, pipeline_type,
                   cross_doc, archived, metadata
            FROM thread_tracking
            WHERE user_id = ? AND thread_id = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| tracker_err("get", e))?;

        Ok(row.map(|r| row_to_record(&r)))
    }

    /// Set or clear the archived flag on every row of a thread.
    pub async fn archive(&self, thread_id: &str, user_id: &str, archived: bool) -> Result<(), CoreError> {
        sqlx::query("UPDATE thread_tracking SET archived = ? WHERE user_id = ? AND thread_id = ?")
            .bind(archived as i64)
            .bind(user_id)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| tracker_err("archive", e))?;
        Ok(())
    }
}

fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> ThreadSummary {
    let created_at_ms: i64 = row.get("created_at");
    let completed_at_ms: Option<i64> = row.get("completed_at");
    ThreadSummary {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        query_text: row.get("query_text"),
        final_answer: row.get("final_answer"),
        created_at: millis_to_datetime(created_at_ms),
        completed_at: completed_at_ms.map(millis_to_datetime),
        archived: row.get::<i64, _>("archived") != 0,
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> ThreadRecord {
    let created_at_ms: i64 = row.get("created_at");
    let completed_at_ms: Option<i64> = row.get("completed_at");
    let graphstate_json: Option<String> = row.get("graphstate");
    let ingestion_meta_json: String = row.get("ingestion_meta");
    let metadata_json: String = row.get("metadata");
    let doc_ids_json: String = row.get("doc_ids");

    ThreadRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        thread_id: row.get("thread_id"),
        doc_ids: doc_ids_from_json(&doc_ids_json),
        query_text: row.get("query_text"),
        final_answer: row.get("final_answer"),
        graphstate: graphstate_json.and_then(|s| serde_json::from_str(&s).ok()),
        ingestion_meta: serde_json::from_str(&ingestion_meta_json).unwrap_or_default(),
        created_at: millis_to_datetime(created_at_ms),
        completed_at: completed_at_ms.map(millis_to_datetime),
        entry_point: entry_point_from_str(&row.get::<String, _>("entry_point")),
        pipeline_type: pipeline_type_from_str(&row.get::<String, _>("pipeline_type")),
        cross_doc: row.get::<i64, _>("cross_doc") != 0,
        archived: row.get::<i64, _>("archived") != 0,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GraphState;

    async fn open_temp() -> (ThreadTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tracker.sqlite");
        let tracker = ThreadTracker::open(&db_path).await.unwrap();
        (tracker, dir)
    }

    #[tokio::test]
    async fn insert_then_update_round_trips_final_answer() {
        let (tracker, _dir) = open_temp().await;
        let id = tracker
            .insert_on_start("alice", "thread-1", &[], "what is x?", EntryPointLabel::Cli, PipelineTypeLabel::Direct, false)
            .await
            .unwrap();

        let state = GraphState::new("thread-1", "alice", "what is x?");
        tracker
            .update_on_completion(id, "x is y", &state, &std::collections::HashMap::new())
            .await
            .unwrap();

        let record = tracker.get_thread("alice", "thread-1").await.unwrap().unwrap();
        assert_eq!(record.final_answer.as_deref(), Some("x is y"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn archived_threads_excluded_by_default() {
        let (tracker, _dir) = open_temp().await;
        tracker
            .insert_on_start("bob", "t1", &[], "q1", EntryPointLabel::Cli, PipelineTypeLabel::Direct, false)
            .await
            .unwrap();
        tracker.archive("t1", "bob", true).await.unwrap();

        let visible = tracker.list_threads("bob", 10, false).await.unwrap();
        assert!(visible.is_empty());

        let all = tracker.list_threads("bob", 10, true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].archived);
    }

    #[tokio::test]
    async fn list_threads_orders_most_recent_first() {
        let (tracker, _dir) = open_temp().await;
        tracker
            .insert_on_start("carol", "t1", &[], "first", EntryPointLabel::Cli, PipelineTypeLabel::Direct, false)
            .await
            .unwrap();
        let id2 = tracker
            .insert_on_start("carol", "t2", &[], "second", EntryPointLabel::Cli, PipelineTypeLabel::Direct, false)
            .await
            .unwrap();
        let state = GraphState::new("t2", "carol", "second");
        tracker
            .update_on_completion(id2, "second answer", &state, &std::collections::HashMap::new())
            .await
            .unwrap();

        let threads = tracker.list_threads("carol", 10, false).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id, "t2"); // has completed_at, ranks first
    }
}
