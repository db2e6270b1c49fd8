//! Query Intent Types
//!
//! The model decides *what the user means* (a plan over registry slugs).
//! The compiler decides *how the database is queried*. Nothing in these
//! types carries SQL.

use crate::llm::adapter::ChatRole;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-invocation caller context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    pub session_id: String,
    /// "Today" as the caller sees it; relative dates resolve against this
    pub current_date: NaiveDate,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Optional analysis lens slug
    #[serde(default)]
    pub lens: Option<String>,
}

impl IntentContext {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, current_date: NaiveDate) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            role: "analyst".to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            current_date,
            history: Vec::new(),
            lens: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_lens(mut self, lens: impl Into<String>) -> Self {
        self.lens = Some(lens.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Time bucket for the date dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
            TimeGranularity::Quarter => "quarter",
            TimeGranularity::Year => "year",
        }
    }
}

/// Filter comparison operator.
///
/// Models emit both the word form (`gte`) and the symbolic form (`>=`);
/// both deserialize to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "eq", alias = "=", alias = "==", alias = "equals")]
    Eq,
    #[serde(rename = "neq", alias = "!=", alias = "<>", alias = "ne")]
    Neq,
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    #[serde(rename = "in", alias = "IN")]
    In,
    #[serde(rename = "not_in", alias = "NOT IN", alias = "nin")]
    NotIn,
    #[serde(rename = "contains", alias = "like", alias = "LIKE", alias = "ilike")]
    Contains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::Contains => "contains",
        }
    }

    /// Comparison operators that need an ordered value
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dimension slug
    #[serde(alias = "dimension")]
    pub field: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Structured plan produced by the intent resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, alias = "date_range")]
    pub date_range: Option<DateRange>,
    #[serde(default, alias = "time_granularity")]
    pub time_granularity: Option<TimeGranularity>,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub rationale: String,
}

/// Outcome of intent resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIntent {
    pub plan: Option<QueryPlan>,
    /// Always within [0, 1]
    pub confidence: f64,
    pub is_clarification: bool,
    pub clarification_text: Option<String>,
    pub provider: String,
    pub model: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
    pub raw_response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_symbolic_operators_deserialize() {
        let f: Filter = serde_json::from_value(json!({
            "dimension": "channel", "operator": ">=", "value": 10
        }))
        .unwrap();
        assert_eq!(f.operator, FilterOperator::Gte);
        assert_eq!(f.field, "channel");

        let f: Filter = serde_json::from_value(json!({
            "field": "channel", "operator": "not_in", "value": ["web"]
        }))
        .unwrap();
        assert_eq!(f.operator, FilterOperator::NotIn);
    }

    #[test]
    fn test_plan_accepts_snake_and_camel_case() {
        let snake: QueryPlan = serde_json::from_value(json!({
            "metrics": ["net_sales"],
            "date_range": {"start": "2024-05-01", "end": "2024-05-31"},
            "time_granularity": "day"
        }))
        .unwrap();
        let camel: QueryPlan = serde_json::from_value(json!({
            "metrics": ["net_sales"],
            "dateRange": {"start": "2024-05-01", "end": "2024-05-31"},
            "timeGranularity": "day"
        }))
        .unwrap();
        assert_eq!(snake, camel);
        assert_eq!(snake.time_granularity, Some(TimeGranularity::Day));
    }
}
