//! SQL-mode retry loop
//!
//! generate → validate → execute, re-prompting with classified feedback on
//! validation or execution failure. Bounded by `max_retries`; provider
//! transport failures and zero-row results end the loop early.

use crate::catalog::schema::SchemaCatalog;
use crate::execution::executor::{QueryRunner, TenantScope};
use crate::execution::result::QueryResult;
use crate::intent::types::IntentContext;
use crate::llm::adapter::LlmAdapter;
use crate::sql_mode::feedback::SqlFeedback;
use crate::sql_mode::generator::{generate_sql, SqlGenerationSettings};
use crate::sql_mode::validator::validate_generated_sql;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SqlFallbackSettings {
    pub max_retries: u8,
    pub generation: SqlGenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlAttempt {
    pub attempt: u8,
    pub sql: Option<String>,
    pub errors: Vec<String>,
    pub row_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlFallbackOutcome {
    /// Result of the last successful execution, possibly empty
    pub result: Option<QueryResult>,
    /// Sanitized SQL that produced `result`
    pub sql: Option<String>,
    pub attempts: Vec<SqlAttempt>,
    pub tokens_input: u32,
    pub tokens_output: u32,
}

impl SqlFallbackOutcome {
    /// Rows to use in place of the metrics result
    pub fn rows(&self) -> Option<&QueryResult> {
        self.result.as_ref().filter(|r| r.row_count > 0)
    }

    /// Every error from every attempt, prefixed with its attempt number
    pub fn errors(&self) -> Vec<String> {
        self.attempts
            .iter()
            .flat_map(|a| a.errors.iter().map(move |e| format!("attempt {}: {}", a.attempt, e)))
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn retry_sql_generation(
    question: &str,
    schema: &SchemaCatalog,
    context: &IntentContext,
    adapter: &dyn LlmAdapter,
    runner: &QueryRunner,
    scope: &TenantScope,
    settings: &SqlFallbackSettings,
) -> SqlFallbackOutcome {
    let mut outcome = SqlFallbackOutcome::default();
    let mut feedback: Option<SqlFeedback> = None;
    let max_rows = settings.generation.max_rows;

    for attempt in 0..=settings.max_retries {
        let generated = match generate_sql(
            question,
            schema,
            context,
            adapter,
            feedback.as_ref(),
            &settings.generation,
        )
        .await
        {
            Ok(generated) => generated,
            Err(err) => {
                outcome.attempts.push(SqlAttempt {
                    attempt,
                    sql: None,
                    errors: vec![err.to_string()],
                    row_count: None,
                });
                if err.is_transport() {
                    warn!(attempt, error = %err, "SQL generation call failed, abandoning SQL mode");
                    break;
                }
                feedback = Some(SqlFeedback::from_validation(
                    attempt.saturating_add(1),
                    "",
                    &[format!("Response could not be parsed: {}", err)],
                ));
                continue;
            }
        };
        outcome.tokens_input += generated.tokens_input;
        outcome.tokens_output += generated.tokens_output;

        let validation = validate_generated_sql(&generated.sql, schema, max_rows);
        let sanitized = match (validation.valid, validation.sanitized_sql) {
            (true, Some(sql)) => sql,
            _ => {
                warn!(attempt, errors = ?validation.errors, "Generated SQL failed validation");
                feedback = Some(SqlFeedback::from_validation(
                    attempt.saturating_add(1),
                    &generated.sql,
                    &validation.errors,
                ));
                outcome.attempts.push(SqlAttempt {
                    attempt,
                    sql: Some(generated.sql),
                    errors: validation.errors,
                    row_count: None,
                });
                continue;
            }
        };

        match runner.execute_sql_query(&sanitized, max_rows, scope).await {
            Ok(result) => {
                info!(attempt, rows = result.row_count, "SQL mode query executed");
                outcome.attempts.push(SqlAttempt {
                    attempt,
                    sql: Some(sanitized.clone()),
                    errors: Vec::new(),
                    row_count: Some(result.row_count),
                });
                outcome.result = Some(result);
                outcome.sql = Some(sanitized);
                break;
            }
            Err(err) => {
                warn!(attempt, error = %err, "SQL mode query failed");
                feedback = Some(SqlFeedback::from_execution(attempt.saturating_add(1), &sanitized, &err));
                outcome.attempts.push(SqlAttempt {
                    attempt,
                    sql: Some(sanitized),
                    errors: vec![err.to_string()],
                    row_count: None,
                });
            }
        }
    }

    outcome
}
