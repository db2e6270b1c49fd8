//! Per-invocation state threaded through the pipeline stages

use crate::catalog::registry::{LensDef, RegistryCatalog};
use crate::compiler::plan_compiler::CompiledQuery;
use crate::eval::sink::TurnRecord;
use crate::execution::result::QueryResult;
use crate::intent::types::{IntentContext, ResolvedIntent};
use crate::narrative::types::NarrativeResult;
use crate::pipeline::output::{ExecutionMode, PipelineOutput};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Clarify,
    Compile,
    ExecuteMetrics,
    SqlFallback,
    Narrate,
    Capture,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intent => "intent",
            Stage::Clarify => "clarify",
            Stage::Compile => "compile",
            Stage::ExecuteMetrics => "execute_metrics",
            Stage::SqlFallback => "sql_fallback",
            Stage::Narrate => "narrate",
            Stage::Capture => "capture",
            Stage::Done => "done",
        }
    }
}

pub struct TurnState {
    pub question: String,
    pub context: IntentContext,
    pub started: Instant,
    pub catalog: Option<RegistryCatalog>,
    pub lens: Option<LensDef>,
    pub resolved: Option<ResolvedIntent>,
    pub compiled: Option<CompiledQuery>,
    pub compilation_errors: Vec<String>,
    pub fallback_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub data: Option<QueryResult>,
    pub mode: Option<ExecutionMode>,
    pub fallback_sql: Option<String>,
    pub narrative: Option<NarrativeResult>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub stage_timings_ms: BTreeMap<String, u64>,
    /// Stages visited, in order
    pub trace: Vec<Stage>,
}

impl TurnState {
    pub fn new(question: &str, context: IntentContext) -> Self {
        Self {
            question: question.to_string(),
            context,
            started: Instant::now(),
            catalog: None,
            lens: None,
            resolved: None,
            compiled: None,
            compilation_errors: Vec::new(),
            fallback_errors: Vec::new(),
            warnings: Vec::new(),
            data: None,
            mode: None,
            fallback_sql: None,
            narrative: None,
            tokens_input: 0,
            tokens_output: 0,
            stage_timings_ms: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    pub fn add_tokens(&mut self, input: u32, output: u32) {
        self.tokens_input += input;
        self.tokens_output += output;
    }

    pub fn is_clarification(&self) -> bool {
        self.resolved.as_ref().map(|r| r.is_clarification).unwrap_or(false)
    }

    /// SQL behind `data`, whichever strategy produced it
    pub fn data_sql(&self) -> Option<String> {
        match self.mode {
            Some(ExecutionMode::Sql) => self.fallback_sql.clone(),
            Some(ExecutionMode::Metrics) => self.compiled.as_ref().map(|c| c.sql.clone()),
            None => None,
        }
    }

    pub fn to_turn_record(&self, error: Option<String>) -> TurnRecord {
        let resolved = self.resolved.as_ref();
        TurnRecord {
            timestamp: Utc::now(),
            tenant_id: self.context.tenant_id.clone(),
            user_id: self.context.user_id.clone(),
            session_id: self.context.session_id.clone(),
            question: self.question.clone(),
            is_clarification: self.is_clarification(),
            confidence: resolved.map(|r| r.confidence).unwrap_or(0.0),
            plan: resolved
                .and_then(|r| r.plan.as_ref())
                .and_then(|p| serde_json::to_value(p).ok()),
            mode: self.mode.map(|m| m.as_str().to_string()),
            compiled_sql: self.compiled.as_ref().map(|c| c.sql.clone()),
            fallback_sql: self.fallback_sql.clone(),
            compilation_errors: self.compilation_errors.clone(),
            fallback_errors: self.fallback_errors.clone(),
            warnings: self.warnings.clone(),
            row_count: self.data.as_ref().map(|d| d.row_count),
            narrative: self.narrative.as_ref().map(|n| n.text.clone()),
            provider: resolved.map(|r| r.provider.clone()),
            model: resolved.map(|r| r.model.clone()),
            tokens_input: self.tokens_input,
            tokens_output: self.tokens_output,
            stage_timings_ms: self.stage_timings_ms.clone(),
            total_latency_ms: self.started.elapsed().as_millis() as u64,
            error,
        }
    }

    pub fn into_output(self, turn_id: Option<String>) -> PipelineOutput {
        let compiled_sql = self.data_sql();
        let is_clarification = self.is_clarification();
        let (plan, confidence, clarification_text, provider) = match self.resolved {
            Some(r) => (r.plan, r.confidence, r.clarification_text, Some(r.provider)),
            None => (None, 0.0, None, None),
        };
        let (narrative, narrative_sections) = match self.narrative {
            Some(n) => (Some(n.text), n.sections),
            None => (None, Vec::new()),
        };

        PipelineOutput {
            is_clarification,
            clarification_text,
            plan,
            confidence,
            mode: self.mode,
            compiled_sql,
            compilation_errors: self.compilation_errors,
            fallback_errors: self.fallback_errors,
            warnings: self.warnings,
            data: self.data,
            narrative,
            narrative_sections,
            provider,
            tokens_input: self.tokens_input,
            tokens_output: self.tokens_output,
            turn_id,
        }
    }
}
