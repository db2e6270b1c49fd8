//! PostgreSQL executor
//!
//! Each statement runs in its own read-only transaction with a local
//! statement timeout and the tenant id exported as `app.tenant_id` for
//! row-level security policies. Rows come back as `row_to_json` so column
//! order and types survive without per-type decoding.

use crate::config::DatabaseConfig;
use crate::error::{NlqError, Result};
use crate::execution::executor::{QueryExecutor, Statement, TenantScope};
use crate::execution::result::{QueryResult, Row};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::QueryScalar;
use sqlx::{PgPool, Postgres};
use std::time::Instant;
use tracing::debug;

pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| NlqError::Config("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type JsonQuery<'q> = QueryScalar<'q, Postgres, Value, PgArguments>;

/// Bind a JSON parameter using the closest native Postgres type
fn bind_param<'q>(query: JsonQuery<'q>, value: &Value) -> JsonQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(items) if !items.is_empty() && items.iter().all(|v| v.is_number()) => {
            query.bind(items.iter().filter_map(|v| v.as_f64()).collect::<Vec<f64>>())
        }
        Value::Array(items) => query.bind(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<String>>(),
        ),
        Value::Object(_) => query.bind(sqlx::types::Json(value.clone())),
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn execute(&self, statement: &Statement, scope: &TenantScope) -> Result<QueryResult> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", statement.timeout_ms))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(&scope.tenant_id)
            .execute(&mut *tx)
            .await?;

        let wrapped = format!(
            "SELECT row_to_json(q) FROM ({}) q LIMIT {}",
            statement.sql.trim().trim_end_matches(';'),
            statement.row_limit + 1
        );
        let mut query = sqlx::query_scalar::<_, Value>(&wrapped);
        for param in &statement.params {
            query = bind_param(query, param);
        }
        let values = query.fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        let rows: Vec<Row> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        let elapsed = started.elapsed().as_millis() as u64;
        debug!(rows = rows.len(), elapsed_ms = elapsed, tenant = %scope.tenant_id, "Postgres statement finished");

        Ok(QueryResult::from_rows(rows, statement.row_limit, elapsed))
    }
}
