//! Agent logger.
//!
//! One CSV row plus one human-readable text line per completed graph node,
//! appended to per-session files under the configured log directory.
//! Writes are flush-on-write and warn-and-continue: a logger failure (full
//! disk, permissions) is reported via `tracing` and otherwise ignored — it
//! must never fail the query it is auditing. Only state already present on
//! `GraphState` is recorded; no LLM/provider credentials pass through here.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::types::GraphState;

const CSV_HEADER: &[&str] = &[
    "timestamp",
    "session_id",
    "node_name",
    "action",
    "question",
    "plan",
    "query_used",
    "num_chunks",
    "pages",
    "confidence",
    "iterations",
    "refinements",
    "final_answer",
    "extra_metadata",
];

pub struct AgentLogger {
    log_dir: PathBuf,
}

impl AgentLogger {
    pub fn new(log_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            tracing::warn!(error = %e, dir = %log_dir.display(), "could not create agent log directory");
        }
        Self {
            log_dir: log_dir.to_path_buf(),
        }
    }

    fn csv_path(&self, session_id: &str) -> PathBuf {
        self.log_dir.join(format!("{session_id}.csv"))
    }

    fn txt_path(&self, session_id: &str) -> PathBuf {
        self.log_dir.join(format!("{session_id}.txt"))
    }

    /// Append one audit row for a completed node. Never returns
    /// an error — failures are logged and swallowed.
    pub fn log_step(&self, session_id: &str, node_name: &str, state: &GraphState) {
        if let Err(e) = self.write_csv_row(session_id, node_name, state) {
            tracing::warn!(error = %e, session_id, node_name, "agent logger failed to write csv row");
        }
        if let Err(e) = self.write_txt_line(session_id, node_name, state) {
            tracing::warn!(error = %e, session_id, node_name, "agent logger failed to write txt line");
        }
    }

    fn write_csv_row(&self, session_id: &str, node_name: &str, state: &GraphState) -> std::io::Result<()> {
        let path = self.csv_path(session_id);
        let needs_header = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer.write_record(CSV_HEADER)?;
        }

        let pages_json = serde_json::to_string(
            &state
                .candidates
                .iter()
                .map(|c| (c.doc_id, c.page_start, c.page_end))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());
        let refinements_json = serde_json::to_string(&state.refinements).unwrap_or_else(|_| "[]".into());
        let metadata_json = serde_json::to_string(&state.attachments_metadata).unwrap_or_else(|_| "{}".into());
        let action_str = state.action.map(|a| format!("{a:?}")).unwrap_or_default();

        writer.write_record([
            Utc::now().to_rfc3339(),
            session_id.to_string(),
            node_name.to_string(),
            action_str,
            state.question.clone(),
            state.plan.clone(),
            state.sub_query.clone(),
            state.candidates.len().to_string(),
            pages_json,
            state.confidence.to_string(),
            state.iteration.to_string(),
            refinements_json,
            state.final_answer.clone().unwrap_or_default(),
            metadata_json,
        ])?;

        writer.flush()
    }

    fn write_txt_line(&self, session_id: &str, node_name: &str, state: &GraphState) -> std::io::Result<()> {
        use std::io::Write;

        let path = self.txt_path(session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "[{}] session={} node={} iter={} confidence={:.3} action={:?} chunks={}",
            Utc::now().to_rfc3339(),
            session_id,
            node_name,
            state.iteration,
            state.confidence,
            state.action,
            state.candidates.len(),
        )?;
        file.flush()
    }
}

impl crate::graph::GraphObserver for AgentLogger {
    fn on_node(&self, node_name: &str, state: &GraphState) {
        self.log_step(&state.thread_id, node_name, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GraphState;

    #[test]
    fn log_step_creates_csv_with_header_and_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AgentLogger::new(dir.path());
        let state = GraphState::new("thread-1", "user-1", "what is x?");

        logger.log_step("thread-1", "planner", &state);
        logger.log_step("thread-1", "retriever", &state);

        let content = std::fs::read_to_string(dir.path().join("thread-1.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 rows
        assert!(lines[0].starts_with("timestamp,session_id,node_name"));
        assert!(lines[1].contains("planner"));
        assert!(lines[2].contains("retriever"));
    }

    #[test]
    fn log_step_writes_human_readable_txt_line() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AgentLogger::new(dir.path());
        let state = GraphState::new("thread-2", "user-1", "question");

        logger.log_step("thread-2", "critic", &state);

        let content = std::fs::read_to_string(dir.path().join("thread-2.txt")).unwrap();
        assert!(content.contains("node=critic"));
    }

    #[test]
    fn log_step_does_not_panic_when_directory_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AgentLogger::new(dir.path());
        std::fs::remove_dir_all(dir.path()).unwrap();

        let state = GraphState::new("thread-3", "user-1", "question");
        logger.log_step("thread-3", "planner", &state); // must warn, not panic
    }

    #[test]
    fn separate_sessions_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AgentLogger::new(dir.path());
        let state_a = GraphState::new("thread-a", "user-1", "q");
        let state_b = GraphState::new("thread-b", "user-1", "q");

        logger.log_step("thread-a", "planner", &state_a);
        logger.log_step("thread-b", "planner", &state_b);

        assert!(dir.path().join("thread-a.csv").exists());
        assert!(dir.path().join("thread-b.csv").exists());
    }
}
