//! Pipeline output

use crate::execution::result::QueryResult;
use crate::intent::types::QueryPlan;
use crate::narrative::types::Section;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Metrics,
    Sql,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Metrics => "metrics",
            ExecutionMode::Sql => "sql",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub is_clarification: bool,
    pub clarification_text: Option<String>,
    pub plan: Option<QueryPlan>,
    pub confidence: f64,
    /// Strategy that produced `data`; `None` when no data was retrieved
    pub mode: Option<ExecutionMode>,
    /// SQL that produced `data`
    pub compiled_sql: Option<String>,
    pub compilation_errors: Vec<String>,
    pub fallback_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub data: Option<QueryResult>,
    pub narrative: Option<String>,
    pub narrative_sections: Vec<Section>,
    pub provider: Option<String>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub turn_id: Option<String>,
}
