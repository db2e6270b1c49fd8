//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use nlq_pipeline::catalog::{ColumnSchema, SchemaProvider, StaticRegistryProvider, StaticSchemaProvider, TableSchema};
use nlq_pipeline::config::PipelineConfig;
use nlq_pipeline::error::{NlqError, Result};
use nlq_pipeline::eval::{EvalSink, MemoryEvalSink, TurnRecord};
use nlq_pipeline::execution::{QueryExecutor, QueryResult, QueryRunner, Row, Statement, TenantScope};
use nlq_pipeline::intent::IntentContext;
use nlq_pipeline::llm::{ChatMessage, CompletionOptions, LlmAdapter, LlmResponse};
use nlq_pipeline::observability::PipelineMetrics;
use nlq_pipeline::pipeline::{Pipeline, PipelineDeps};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REGISTRY_JSON: &str = r#"{
  "metrics": [
    {"slug": "net_sales", "name": "Net sales", "sql_expression": "SUM(o.net_amount)",
     "table": "orders o", "date_column": "o.ordered_at", "tenant_column": "o.tenant_id"},
    {"slug": "order_count", "name": "Orders", "sql_expression": "COUNT(*)",
     "table": "orders o", "date_column": "o.ordered_at", "tenant_column": "o.tenant_id"}
  ],
  "dimensions": [
    {"slug": "channel", "name": "Channel", "sql_expression": "o.channel", "table": "orders o"}
  ],
  "lenses": [
    {"slug": "growth", "name": "Growth", "prompt_fragment": "Focus on growth levers."}
  ]
}"#;

/// Model stand-in that answers from per-purpose queues
#[derive(Default)]
pub struct ScriptedAdapter {
    responses: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, purpose: &str, content: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(purpose.to_string())
            .or_default()
            .push_back(content.to_string());
        self
    }

    /// Purposes of every call, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, purpose: &str) -> bool {
        self.calls().iter().any(|c| c == purpose)
    }
}

#[async_trait]
impl LlmAdapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _messages: &[ChatMessage], options: &CompletionOptions) -> Result<LlmResponse> {
        self.calls.lock().unwrap().push(options.purpose.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&options.purpose)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(content) => Ok(LlmResponse {
                content,
                tokens_input: 100,
                tokens_output: 20,
                model: "scripted-1".to_string(),
                provider: "scripted".to_string(),
                latency_ms: 1,
                stop_reason: Some("stop".to_string()),
            }),
            None => Err(NlqError::Llm(format!("no scripted response for '{}'", options.purpose))),
        }
    }
}

enum Reply {
    Rows(Vec<Row>),
    Fail(String),
}

/// Executor that answers by matching a fragment of the statement text
#[derive(Default)]
pub struct MockExecutor {
    replies: Mutex<Vec<(String, Reply)>>,
    statements: Mutex<Vec<Statement>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(self, fragment: &str, rows: Vec<serde_json::Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.replies.lock().unwrap().push((fragment.to_string(), Reply::Rows(rows)));
        self
    }

    pub fn fail(self, fragment: &str, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push((fragment.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, statement: &Statement, _scope: &TenantScope) -> Result<QueryResult> {
        self.statements.lock().unwrap().push(statement.clone());
        let replies = self.replies.lock().unwrap();
        match replies.iter().find(|(fragment, _)| statement.sql.contains(fragment.as_str())) {
            Some((_, Reply::Rows(rows))) => Ok(QueryResult::from_rows(rows.clone(), statement.row_limit, 3)),
            Some((_, Reply::Fail(message))) => Err(NlqError::Database(message.clone())),
            None => Ok(QueryResult::empty(1)),
        }
    }
}

pub fn orders_schema() -> Arc<dyn SchemaProvider> {
    let column = |name: &str, data_type: &str| ColumnSchema {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: false,
    };
    Arc::new(StaticSchemaProvider::new(vec![TableSchema {
        schema: "public".to_string(),
        name: "orders".to_string(),
        columns: vec![
            column("id", "bigint"),
            column("tenant_id", "text"),
            column("net_amount", "numeric"),
            column("ordered_at", "timestamptz"),
        ],
    }]))
}

pub fn context() -> IntentContext {
    IntentContext::new("tenant-a", "user-1", NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub adapter: Arc<ScriptedAdapter>,
    pub executor: Arc<MockExecutor>,
    pub sink: Arc<MemoryEvalSink>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Sink whose writes always fail
pub struct FailingEvalSink;

#[async_trait]
impl EvalSink for FailingEvalSink {
    async fn record_turn(&self, _turn: &TurnRecord) -> Result<String> {
        Err(NlqError::Io("eval store unavailable".to_string()))
    }
}

/// Sink that never finishes within a test's eval timeout
pub struct StalledEvalSink;

#[async_trait]
impl EvalSink for StalledEvalSink {
    async fn record_turn(&self, _turn: &TurnRecord) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("late".to_string())
    }
}

pub fn harness(
    adapter: ScriptedAdapter,
    executor: MockExecutor,
    schema: Option<Arc<dyn SchemaProvider>>,
    config: PipelineConfig,
) -> Harness {
    let sink = Arc::new(MemoryEvalSink::new());
    build_harness(adapter, executor, schema, config, sink.clone(), Some(sink))
}

/// Harness whose pipeline writes to `eval_sink` instead of the memory sink
pub fn harness_with_sink(
    adapter: ScriptedAdapter,
    executor: MockExecutor,
    schema: Option<Arc<dyn SchemaProvider>>,
    config: PipelineConfig,
    eval_sink: Option<Arc<dyn EvalSink>>,
) -> Harness {
    build_harness(adapter, executor, schema, config, Arc::new(MemoryEvalSink::new()), eval_sink)
}

fn build_harness(
    adapter: ScriptedAdapter,
    executor: MockExecutor,
    schema: Option<Arc<dyn SchemaProvider>>,
    config: PipelineConfig,
    sink: Arc<MemoryEvalSink>,
    eval_sink: Option<Arc<dyn EvalSink>>,
) -> Harness {
    let adapter = Arc::new(adapter);
    let executor = Arc::new(executor);
    let metrics = Arc::new(PipelineMetrics::new());
    let registry = StaticRegistryProvider::from_json_str(REGISTRY_JSON).unwrap();

    let deps = PipelineDeps {
        adapter: adapter.clone(),
        registry: Arc::new(registry),
        schema,
        runner: Arc::new(QueryRunner::new(executor.clone(), Duration::from_secs(2))),
        eval_sink,
        masker: None,
        metrics: metrics.clone(),
    };

    Harness {
        pipeline: Pipeline::new(deps, config),
        adapter,
        executor,
        sink,
        metrics,
    }
}
