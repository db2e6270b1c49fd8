//! Evaluation Sink
//!
//! Every invocation leaves one `TurnRecord`: what was asked, what the
//! pipeline decided at each stage, and what it cost.

use crate::error::{NlqError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub user_id: String,
    pub session_id: String,
    pub question: String,
    pub is_clarification: bool,
    pub confidence: f64,
    pub plan: Option<serde_json::Value>,
    pub mode: Option<String>,
    pub compiled_sql: Option<String>,
    pub fallback_sql: Option<String>,
    pub compilation_errors: Vec<String>,
    pub fallback_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub row_count: Option<usize>,
    pub narrative: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    /// Wall time per stage, keyed by stage name
    pub stage_timings_ms: BTreeMap<String, u64>,
    pub total_latency_ms: u64,
    /// Fatal error, when the invocation failed
    pub error: Option<String>,
}

#[async_trait]
pub trait EvalSink: Send + Sync {
    /// Persist a record and return its turn id
    async fn record_turn(&self, turn: &TurnRecord) -> Result<String>;
}

/// Append-only JSON lines file
pub struct JsonlEvalSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(Serialize)]
struct JsonlLine<'a> {
    turn_id: &'a str,
    #[serde(flatten)]
    turn: &'a TurnRecord,
}

impl JsonlEvalSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl EvalSink for JsonlEvalSink {
    async fn record_turn(&self, turn: &TurnRecord) -> Result<String> {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let mut line = serde_json::to_string(&JsonlLine {
            turn_id: &turn_id,
            turn,
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| NlqError::Io(format!("Failed to open eval log {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(turn_id = %turn_id, path = %self.path.display(), "Recorded eval turn");
        Ok(turn_id)
    }
}

/// In-memory sink for tests and embedding
#[derive(Default)]
pub struct MemoryEvalSink {
    records: Mutex<Vec<(String, TurnRecord)>>,
}

impl MemoryEvalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, TurnRecord)> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EvalSink for MemoryEvalSink {
    async fn record_turn(&self, turn: &TurnRecord) -> Result<String> {
        let turn_id = uuid::Uuid::new_v4().to_string();
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((turn_id.clone(), turn.clone()));
        Ok(turn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(question: &str) -> TurnRecord {
        TurnRecord {
            timestamp: Utc::now(),
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            question: question.into(),
            is_clarification: false,
            confidence: 0.9,
            plan: None,
            mode: Some("metrics".into()),
            compiled_sql: Some("SELECT 1".into()),
            fallback_sql: None,
            compilation_errors: vec![],
            fallback_errors: vec![],
            warnings: vec![],
            row_count: Some(1),
            narrative: None,
            provider: Some("openai".into()),
            model: None,
            tokens_input: 10,
            tokens_output: 5,
            stage_timings_ms: BTreeMap::new(),
            total_latency_ms: 12,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.jsonl");
        let sink = JsonlEvalSink::new(path.clone());

        let first = sink.record_turn(&turn("a")).await.unwrap();
        let second = sink.record_turn(&turn("b")).await.unwrap();
        assert_ne!(first, second);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["turn_id"], first);
        assert_eq!(lines[1]["question"], "b");
        assert_eq!(lines[0]["compiledSql"], "SELECT 1");
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_records() {
        let sink = MemoryEvalSink::new();
        let id = sink.record_turn(&turn("a")).await.unwrap();
        assert_eq!(sink.records()[0].0, id);
    }
}
