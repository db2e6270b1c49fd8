//! SQL Generator
//!
//! Asks the model for one PostgreSQL SELECT grounded in the raw schema.
//! Used only when the metrics path cannot answer.

use crate::catalog::schema::SchemaCatalog;
use crate::error::Result;
use crate::intent::types::IntentContext;
use crate::llm::adapter::{ChatMessage, CompletionOptions, LlmAdapter};
use crate::llm::json::parse_json_response;
use crate::resilience::prompt_guard::{PromptGuard, PromptSection, SectionKind};
use crate::sql_mode::feedback::SqlFeedback;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone)]
pub struct SqlGenerationSettings {
    pub model: Option<String>,
    pub token_budget: usize,
    pub max_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: String,
    pub confidence: f64,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub prompt_truncated: bool,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    sql: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    confidence: Option<f64>,
}

const SQL_EXAMPLES: &str = r#"EXAMPLES:
Q: How many orders did we get yesterday?
{"sql": "SELECT COUNT(*) AS total_orders FROM orders o WHERE o.tenant_id = $1 AND o.ordered_at >= DATE '2024-06-09' AND o.ordered_at < DATE '2024-06-10'", "explanation": "Counts yesterday's orders.", "confidence": 0.9}

Q: Top 5 customers by spend this year
{"sql": "SELECT c.id, c.name, SUM(o.net_amount) AS spend FROM orders o JOIN customers c ON c.id = o.customer_id WHERE o.tenant_id = $1 AND o.ordered_at >= DATE '2024-01-01' GROUP BY c.id, c.name ORDER BY spend DESC LIMIT 5", "explanation": "Sums order value per customer.", "confidence": 0.8}"#;

fn build_prompt(
    question: &str,
    schema: &SchemaCatalog,
    context: &IntentContext,
    feedback: Option<&SqlFeedback>,
    settings: &SqlGenerationSettings,
) -> (String, bool) {
    let mut sections = vec![
        PromptSection::required(
            "rules",
            format!(
                r#"You write PostgreSQL queries for business questions. Today's date is {today}.
Rules:
- Exactly one read-only SELECT statement (WITH is allowed). No DDL, DML or locking.
- Use only the tables and columns listed below.
- Every table with a tenant_id column must be filtered with tenant_id = $1.
- Return at most {max_rows} rows.
Respond with ONLY a JSON object: {{"sql": "...", "explanation": "...", "confidence": 0.0-1.0}}"#,
                today = context.current_date,
                max_rows = settings.max_rows,
            ),
        ),
        PromptSection::required("tables", format!("TABLES:\n{}", schema.summary_text)),
        PromptSection::optional("schema_detail", SectionKind::Schema, format!("COLUMNS:\n{}", schema.full_text)),
        PromptSection::optional("examples", SectionKind::Examples, SQL_EXAMPLES),
    ];
    if let Some(feedback) = feedback {
        sections.push(PromptSection::required("feedback", feedback.to_prompt(schema)));
    }
    sections.push(PromptSection::required("question", format!("QUESTION:\n{}", question.trim())));

    let guarded = PromptGuard::new(settings.token_budget).assemble(sections);
    (guarded.text, guarded.was_truncated)
}

pub async fn generate_sql(
    question: &str,
    schema: &SchemaCatalog,
    context: &IntentContext,
    adapter: &dyn LlmAdapter,
    feedback: Option<&SqlFeedback>,
    settings: &SqlGenerationSettings,
) -> Result<GeneratedSql> {
    let (system, prompt_truncated) = build_prompt(question, schema, context, feedback, settings);
    let messages = vec![ChatMessage::system(system), ChatMessage::user(question)];

    let mut options = CompletionOptions::for_purpose("sql")
        .with_temperature(0.0)
        .with_scope(context.tenant_id.clone());
    if feedback.is_some() {
        // Retries must reach the model, never a cached failed answer
        options = options.uncached();
    }
    if let Some(model) = &settings.model {
        options = options.with_model(model.clone());
    }

    let response = adapter.complete(&messages, &options).await?;
    let parsed: SqlResponse = parse_json_response(&response.content, "SQL generation")?;

    info!(
        attempt = feedback.map(|f| f.attempt).unwrap_or(0),
        prompt_truncated,
        "Generated SQL"
    );

    Ok(GeneratedSql {
        sql: parsed.sql,
        explanation: parsed.explanation,
        confidence: parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        tokens_input: response.tokens_input,
        tokens_output: response.tokens_output,
        prompt_truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::tests::sample_schema;
    use chrono::NaiveDate;

    fn settings(budget: usize) -> SqlGenerationSettings {
        SqlGenerationSettings {
            model: None,
            token_budget: budget,
            max_rows: 100,
        }
    }

    #[test]
    fn test_prompt_drops_examples_first_under_pressure() {
        let ctx = IntentContext::new("t1", "u1", NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        let (full, truncated) = build_prompt("orders?", &sample_schema(), &ctx, None, &settings(10_000));
        assert!(!truncated);
        assert!(full.contains("EXAMPLES:"));

        let (tight, truncated) = build_prompt("orders?", &sample_schema(), &ctx, None, &settings(160));
        assert!(truncated);
        assert!(!tight.contains("EXAMPLES:"));
        assert!(tight.contains("TABLES:"));
    }

    #[test]
    fn test_prompt_carries_the_question() {
        let ctx = IntentContext::new("t1", "u1", NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        let (prompt, _) = build_prompt(
            "  top customers by spend  ",
            &sample_schema(),
            &ctx,
            None,
            &settings(10_000),
        );
        assert!(prompt.contains("QUESTION:\ntop customers by spend"));

        let (tight, truncated) = build_prompt("top customers by spend", &sample_schema(), &ctx, None, &settings(160));
        assert!(truncated);
        assert!(tight.contains("top customers by spend"));
    }
}
