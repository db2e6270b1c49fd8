//! Query Executor - contract and cached, time-bounded execution
//!
//! Executors are pluggable behind `QueryExecutor`. `QueryRunner` adds the
//! result cache, the client-side timeout and error classification shared by
//! both metrics mode and SQL mode.

use crate::cache::result::ResultCache;
use crate::cache::stale::CacheLookup;
use crate::compiler::plan_compiler::CompiledQuery;
use crate::error::{NlqError, Result};
use crate::execution::result::QueryResult;
use crate::sql_mode::validator::references_tenant_param;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One parameterized, row-limited statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub row_limit: usize,
    pub timeout_ms: u64,
}

/// Identity under which a statement runs (row-level security)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executor name (e.g., "postgres")
    fn name(&self) -> &str;

    /// Execute a read-only statement. Implementations fetch at most
    /// `row_limit + 1` rows and report truncation.
    async fn execute(&self, statement: &Statement, scope: &TenantScope) -> Result<QueryResult>;
}

pub struct QueryRunner {
    executor: Arc<dyn QueryExecutor>,
    cache: Option<Arc<ResultCache>>,
    timeout: Duration,
}

impl QueryRunner {
    pub fn new(executor: Arc<dyn QueryExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            cache: None,
            timeout,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Metrics mode: run a compiled plan
    pub async fn execute_compiled_query(
        &self,
        compiled: &CompiledQuery,
        scope: &TenantScope,
    ) -> Result<QueryResult> {
        let statement = Statement {
            sql: compiled.sql.clone(),
            params: compiled.params.clone(),
            row_limit: compiled.row_limit,
            timeout_ms: self.timeout.as_millis() as u64,
        };
        self.run(&statement, scope).await
    }

    /// SQL mode: run validated, sanitized SQL. The tenant id is still bound
    /// as `$1` so generated SQL may reference it.
    pub async fn execute_sql_query(
        &self,
        sanitized_sql: &str,
        row_limit: usize,
        scope: &TenantScope,
    ) -> Result<QueryResult> {
        let params = if references_tenant_param(sanitized_sql) {
            vec![serde_json::json!(scope.tenant_id)]
        } else {
            Vec::new()
        };
        let statement = Statement {
            sql: sanitized_sql.to_string(),
            params,
            row_limit,
            timeout_ms: self.timeout.as_millis() as u64,
        };
        self.run(&statement, scope).await
    }

    async fn run(&self, statement: &Statement, scope: &TenantScope) -> Result<QueryResult> {
        let key = ResultCache::fingerprint(&scope.tenant_id, &statement.sql, &statement.params);
        let stale = match self.cache.as_ref().map(|c| c.get(&key)) {
            Some(CacheLookup::Fresh(result)) => {
                debug!(executor = self.executor.name(), "Serving query result from cache");
                return Ok(result);
            }
            Some(CacheLookup::Stale(result)) => Some(result),
            _ => None,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.executor.execute(statement, scope)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(classify(err)),
            Err(_) => Err(NlqError::timeout(format!(
                "Query exceeded {} ms",
                self.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(result) => {
                info!(
                    executor = self.executor.name(),
                    rows = result.row_count,
                    truncated = result.truncated,
                    execution_time_ms = result.execution_time_ms,
                    "Query executed"
                );
                if let Some(cache) = &self.cache {
                    cache.put(&key, result.clone());
                }
                Ok(result)
            }
            Err(err) => match stale {
                Some(result) => {
                    warn!(error = %err, "Query failed, serving stale cached result");
                    Ok(result)
                }
                None => Err(err),
            },
        }
    }
}

/// Every executor failure surfaces as QUERY_ERROR or QUERY_TIMEOUT
fn classify(err: NlqError) -> NlqError {
    match err {
        NlqError::Execution { .. } => err,
        NlqError::Database(message) if is_timeout_message(&message) => NlqError::timeout(message),
        other => NlqError::query(other.to_string()),
    }
}

fn is_timeout_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("statement timeout") || lower.contains("canceling statement due to")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionErrorCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedExecutor {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl QueryExecutor for ScriptedExecutor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, statement: &Statement, _scope: &TenantScope) -> Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(NlqError::Database("canceling statement due to statement timeout".into()));
            }
            let row = serde_json::json!({"n": statement.params.len()});
            Ok(QueryResult::from_rows(vec![row.as_object().cloned().unwrap()], statement.row_limit, 1))
        }
    }

    fn scope() -> TenantScope {
        TenantScope {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            role: "analyst".into(),
        }
    }

    fn executor(delay_ms: u64) -> Arc<ScriptedExecutor> {
        Arc::new(ScriptedExecutor {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn test_client_timeout_is_query_timeout() {
        let runner = QueryRunner::new(executor(200), Duration::from_millis(20));
        let err = runner.execute_sql_query("SELECT 1", 10, &scope()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_database_errors_are_classified() {
        let exec = executor(0);
        exec.fail.store(true, Ordering::SeqCst);
        let runner = QueryRunner::new(exec, Duration::from_secs(1));
        let err = runner.execute_sql_query("SELECT 1", 10, &scope()).await.unwrap_err();
        assert!(matches!(
            err,
            NlqError::Execution { code: ExecutionErrorCode::QueryTimeout, .. }
        ));
    }

    #[tokio::test]
    async fn test_stale_result_served_when_execution_fails() {
        let exec = executor(0);
        let cache = Arc::new(ResultCache::new(Duration::ZERO, Duration::from_secs(60), 10));
        let runner = QueryRunner::new(exec.clone(), Duration::from_secs(1)).with_cache(cache);

        let first = runner.execute_sql_query("SELECT $1", 10, &scope()).await.unwrap();
        exec.fail.store(true, Ordering::SeqCst);
        let second = runner.execute_sql_query("SELECT $1", 10, &scope()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tenant_param_bound_only_for_placeholder() {
        let runner = QueryRunner::new(executor(0), Duration::from_secs(1));
        let bound = |result: QueryResult| result.rows[0]["n"].clone();

        let result = runner
            .execute_sql_query("SELECT id FROM orders WHERE tenant_id = $1", 10, &scope())
            .await
            .unwrap();
        assert_eq!(bound(result), serde_json::json!(1));

        for sql in [
            "SELECT id FROM orders WHERE note = '$1 off'",
            "SELECT $10 AS total",
            "SELECT id FROM orders -- tenant_id = $1",
        ] {
            let result = runner.execute_sql_query(sql, 10, &scope()).await.unwrap();
            assert_eq!(bound(result), serde_json::json!(0), "{}", sql);
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_executor() {
        let exec = executor(0);
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), Duration::ZERO, 10));
        let runner = QueryRunner::new(exec.clone(), Duration::from_secs(1)).with_cache(cache);
        runner.execute_sql_query("SELECT 1", 10, &scope()).await.unwrap();
        runner.execute_sql_query("SELECT 1", 10, &scope()).await.unwrap();
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
    }
}
