mod common;

use common::{
    context, harness, harness_with_sink, orders_schema, FailingEvalSink, MockExecutor, ScriptedAdapter,
    StalledEvalSink,
};
use nlq_pipeline::config::PipelineConfig;
use nlq_pipeline::error::NlqError;
use nlq_pipeline::narrative::SectionType;
use nlq_pipeline::pipeline::{ExecutionMode, RunOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const NET_SALES_BY_DAY: &str = r#"{
  "plan": {
    "metrics": ["net_sales"],
    "dimensions": [],
    "filters": [],
    "date_range": {"start": "2024-02-01", "end": "2024-02-29"},
    "time_granularity": "day",
    "intent": "net sales by day last month"
  },
  "confidence": 0.92,
  "is_clarification": false
}"#;

const ORDERS_LAST_MONTH: &str = r#"{
  "plan": {"metrics": ["order_count"], "date_range": {"start": "2024-02-01", "end": "2024-02-29"}},
  "confidence": 0.8
}"#;

const NARRATIVE: &str = r#"```json
{"text": "Net sales peaked on Feb 2.", "sections": [
  {"type": "answer", "content": "Net sales peaked on Feb 2 at $1,300."},
  {"type": "takeaway", "content": "Weekends are slower."}
]}
```"#;

const TOTAL_ORDERS_SQL: &str = r#"{"sql": "SELECT COUNT(*) AS total_orders FROM orders o WHERE o.tenant_id = $1", "explanation": "Counts orders.", "confidence": 0.7}"#;

#[tokio::test]
async fn test_net_sales_by_day_runs_in_metrics_mode() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", NET_SALES_BY_DAY)
        .respond("narrative", NARRATIVE);
    let executor = MockExecutor::new().rows(
        "SUM(o.net_amount)",
        vec![
            json!({"period": "2024-02-01", "net_sales": 1200.5}),
            json!({"period": "2024-02-02", "net_sales": 1300.0}),
        ],
    );
    let h = harness(adapter, executor, Some(orders_schema()), PipelineConfig::default());

    let output = h
        .pipeline
        .run("net sales by day last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert!(!output.is_clarification);
    assert_eq!(output.mode, Some(ExecutionMode::Metrics));
    assert_eq!(output.data.as_ref().unwrap().row_count, 2);
    assert!(output.compiled_sql.as_deref().unwrap().contains("DATE_TRUNC('day'"));
    assert!(output.compilation_errors.is_empty());
    assert_eq!(output.narrative_sections[0].section_type, SectionType::Answer);
    assert_eq!(output.narrative.as_deref(), Some("Net sales peaked on Feb 2."));
    assert_eq!(output.tokens_input, 200);
    assert!(!h.adapter.called("sql"));

    let statements = h.executor.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].params[0], json!("tenant-a"));

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(output.turn_id.as_deref(), Some(records[0].0.as_str()));
    assert_eq!(records[0].1.mode.as_deref(), Some("metrics"));
    assert_eq!(records[0].1.row_count, Some(2));
    assert!(records[0].1.stage_timings_ms.contains_key("execute_metrics"));
}

#[tokio::test]
async fn test_vague_question_asks_for_clarification() {
    let adapter = ScriptedAdapter::new().respond(
        "intent",
        r#"{"plan": null, "confidence": 0.3, "is_clarification": true,
            "clarification_text": "Do you mean gross or net sales, and for which period?"}"#,
    );
    let h = harness(adapter, MockExecutor::new(), Some(orders_schema()), PipelineConfig::default());

    let output = h.pipeline.run("Show me sales", context(), RunOptions::default()).await.unwrap();

    assert!(output.is_clarification);
    assert!(output.clarification_text.unwrap().contains("gross or net"));
    assert!(output.plan.is_none());
    assert!(output.data.is_none());
    assert!(output.narrative.is_none());
    assert!(output.compiled_sql.is_none());
    assert!(h.executor.statements().is_empty());
    assert_eq!(h.adapter.calls(), vec!["intent".to_string()]);
    assert!(h.sink.records()[0].1.is_clarification);
    assert_eq!(h.metrics.snapshot().clarifications, 1);
}

#[tokio::test]
async fn test_empty_metrics_result_falls_back_to_sql_mode() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", ORDERS_LAST_MONTH)
        .respond("sql", TOTAL_ORDERS_SQL)
        .respond("narrative", r#"{"text": "You had 42 orders.", "sections": [{"type": "answer", "content": "42 orders."}]}"#);
    let executor = MockExecutor::new().rows("total_orders", vec![json!({"total_orders": 42})]);
    let h = harness(adapter, executor, Some(orders_schema()), PipelineConfig::default());

    let output = h
        .pipeline
        .run("how many orders last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output.mode, Some(ExecutionMode::Sql));
    let data = output.data.unwrap();
    assert_eq!(data.row_count, 1);
    assert_eq!(data.rows[0]["total_orders"], json!(42));
    let sql = output.compiled_sql.unwrap();
    assert!(sql.contains("total_orders"));
    assert!(sql.contains("LIMIT"));
    assert!(output.fallback_errors.is_empty());
    assert_eq!(h.executor.statements().len(), 2);
    assert_eq!(h.metrics.snapshot().sql_fallbacks, 1);

    let record = &h.sink.records()[0].1;
    assert_eq!(record.mode.as_deref(), Some("sql"));
    assert!(record.compiled_sql.as_deref().unwrap().contains("COUNT(*)"));
    assert!(record.fallback_sql.is_some());
}

#[tokio::test]
async fn test_empty_metrics_result_is_kept_when_fallback_on_empty_is_off() {
    let adapter = ScriptedAdapter::new().respond("intent", ORDERS_LAST_MONTH);
    let config = PipelineConfig {
        fallback_on_empty: false,
        ..PipelineConfig::default()
    };
    let h = harness(adapter, MockExecutor::new(), Some(orders_schema()), config);

    let output = h
        .pipeline
        .run("how many orders last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output.mode, Some(ExecutionMode::Metrics));
    assert_eq!(output.data.unwrap().row_count, 0);
    assert!(!h.adapter.called("sql"));
    // Empty results are narrated from the template, not the model
    assert!(!h.adapter.called("narrative"));
    assert_eq!(output.narrative_sections[0].section_type, SectionType::Answer);
    assert!(output.narrative.unwrap().contains("no matching data"));
}

#[tokio::test]
async fn test_no_metrics_plan_degrades_to_advisor_narrative() {
    let adapter = ScriptedAdapter::new()
        .respond(
            "intent",
            r#"{"plan": {"metrics": [], "dimensions": ["channel"]}, "confidence": 0.6}"#,
        )
        .respond(
            "advisor",
            "## Answer\nI couldn't query your data, but channel mix usually follows traffic.\n\n## Quick Wins\n- Review paid channels",
        );
    let h = harness(adapter, MockExecutor::new(), None, PipelineConfig::default());

    let output = h.pipeline.run("which channel is best", context(), RunOptions::default()).await.unwrap();

    assert!(output.data.is_none());
    assert!(output.mode.is_none());
    assert!(!output.compilation_errors.is_empty());
    assert!(output.compilation_errors[0].contains("NO_METRICS"));
    assert!(output
        .narrative_sections
        .iter()
        .any(|s| s.section_type == SectionType::Answer));
    assert!(h.executor.statements().is_empty());
    assert!(!h.adapter.called("sql"));
}

#[tokio::test]
async fn test_narration_failure_uses_fallback_template() {
    // No advisor response scripted: the model call fails
    let adapter = ScriptedAdapter::new().respond(
        "intent",
        r#"{"plan": {"metrics": ["refund_rate"]}, "confidence": 0.6}"#,
    );
    let h = harness(adapter, MockExecutor::new(), None, PipelineConfig::default());

    let output = h.pipeline.run("refund rate?", context(), RunOptions::default()).await.unwrap();

    assert!(output.compilation_errors[0].contains("UNKNOWN_METRIC"));
    assert_eq!(output.narrative_sections[0].section_type, SectionType::Answer);
    assert!(output.narrative.is_some());
}

#[tokio::test]
async fn test_metrics_failure_and_rejected_sql_leave_no_data() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", ORDERS_LAST_MONTH)
        .respond("sql", r#"{"sql": "DELETE FROM orders"}"#)
        .respond("sql", r#"{"sql": "SELECT * FROM payroll"}"#)
        .respond("sql", "not json at all")
        .respond("advisor", r#"{"text": "No data was available.", "sections": [{"type": "answer", "content": "No data."}]}"#);
    let executor = MockExecutor::new().fail("COUNT(*)", "relation \"orders\" is being rebuilt");
    let h = harness(adapter, executor, Some(orders_schema()), PipelineConfig::default());

    let output = h
        .pipeline
        .run("how many orders last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert!(output.data.is_none());
    assert!(output.mode.is_none());
    assert!(output.warnings.iter().any(|w| w.contains("Metrics query failed")));
    assert!(output.fallback_errors.iter().any(|e| e.starts_with("attempt 0")));
    assert!(output.fallback_errors.iter().any(|e| e.starts_with("attempt 2")));
    assert_eq!(h.adapter.calls().iter().filter(|c| *c == "sql").count(), 3);
    // Only the metrics statement reached the database
    assert_eq!(h.executor.statements().len(), 1);
    assert_eq!(output.narrative.as_deref(), Some("No data was available."));
}

#[tokio::test]
async fn test_skip_narrative() {
    let adapter = ScriptedAdapter::new().respond("intent", NET_SALES_BY_DAY);
    let executor = MockExecutor::new().rows("SUM(o.net_amount)", vec![json!({"period": "2024-02-01", "net_sales": 10})]);
    let h = harness(adapter, executor, None, PipelineConfig::default());

    let output = h
        .pipeline
        .run(
            "net sales by day last month",
            context(),
            RunOptions {
                skip_narrative: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(output.mode, Some(ExecutionMode::Metrics));
    assert!(output.narrative.is_none());
    assert!(output.narrative_sections.is_empty());
    assert!(!h.adapter.called("narrative"));
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn test_intent_failure_is_fatal_but_captured() {
    let adapter = ScriptedAdapter::new().respond("intent", "Sure! Net sales are a great metric.");
    let h = harness(adapter, MockExecutor::new(), Some(orders_schema()), PipelineConfig::default());

    let err = h
        .pipeline
        .run("net sales", context(), RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, NlqError::IntentParse(_)));
    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].1.error.as_deref().unwrap().contains("Intent parse error"));
    assert!(h.executor.statements().is_empty());
}

#[tokio::test]
async fn test_metrics_query_error_recovers_through_sql_mode() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", ORDERS_LAST_MONTH)
        .respond("sql", TOTAL_ORDERS_SQL)
        .respond("narrative", r#"{"text": "You had 42 orders.", "sections": [{"type": "answer", "content": "42 orders."}]}"#);
    // The generated statement also contains COUNT(*), so its rows are matched first
    let executor = MockExecutor::new()
        .rows("total_orders", vec![json!({"total_orders": 42})])
        .fail("COUNT(*)", "connection reset by peer");
    let h = harness(adapter, executor, Some(orders_schema()), PipelineConfig::default());

    let output = h
        .pipeline
        .run("how many orders last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output.mode, Some(ExecutionMode::Sql));
    assert_eq!(output.data.unwrap().rows[0]["total_orders"], json!(42));
    assert!(output.warnings.iter().any(|w| w.contains("Metrics query failed")));
    assert!(output.fallback_errors.is_empty());
    assert_eq!(output.narrative.as_deref(), Some("You had 42 orders."));
    assert_eq!(h.executor.statements().len(), 2);
    assert_eq!(h.sink.records()[0].1.mode.as_deref(), Some("sql"));
}

#[tokio::test]
async fn test_failing_eval_sink_does_not_fail_the_run() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", NET_SALES_BY_DAY)
        .respond("narrative", NARRATIVE);
    let executor = MockExecutor::new().rows("SUM(o.net_amount)", vec![json!({"period": "2024-02-01", "net_sales": 10})]);
    let h = harness_with_sink(
        adapter,
        executor,
        None,
        PipelineConfig::default(),
        Some(Arc::new(FailingEvalSink)),
    );

    let output = h
        .pipeline
        .run("net sales by day last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert!(output.turn_id.is_none());
    assert_eq!(output.mode, Some(ExecutionMode::Metrics));
    assert_eq!(output.narrative.as_deref(), Some("Net sales peaked on Feb 2."));
}

#[tokio::test]
async fn test_stalled_eval_sink_is_abandoned_after_its_timeout() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", NET_SALES_BY_DAY)
        .respond("narrative", NARRATIVE);
    let executor = MockExecutor::new().rows("SUM(o.net_amount)", vec![json!({"period": "2024-02-01", "net_sales": 10})]);
    let config = PipelineConfig {
        eval_timeout_ms: 20,
        ..PipelineConfig::default()
    };
    let h = harness_with_sink(adapter, executor, None, config, Some(Arc::new(StalledEvalSink)));

    let started = Instant::now();
    let output = h
        .pipeline
        .run("net sales by day last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert!(started.elapsed().as_secs() < 5);
    assert!(output.turn_id.is_none());
    assert_eq!(output.data.unwrap().row_count, 1);
    assert!(output.narrative.is_some());
}

#[tokio::test]
async fn test_mode_is_counted_without_an_eval_sink() {
    let adapter = ScriptedAdapter::new().respond("intent", NET_SALES_BY_DAY);
    let executor = MockExecutor::new().rows("SUM(o.net_amount)", vec![json!({"period": "2024-02-01", "net_sales": 10})]);
    let h = harness_with_sink(adapter, executor, None, PipelineConfig::default(), None);

    let output = h
        .pipeline
        .run(
            "net sales by day last month",
            context(),
            RunOptions {
                skip_narrative: true,
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(output.turn_id.is_none());
    assert_eq!(h.metrics.snapshot().mode_counts.get("metrics"), Some(&1));
}

#[tokio::test]
async fn test_empty_result_narrative_lists_sql_mode_errors() {
    let adapter = ScriptedAdapter::new()
        .respond("intent", ORDERS_LAST_MONTH)
        .respond("sql", TOTAL_ORDERS_SQL);
    let h = harness(adapter, MockExecutor::new(), Some(orders_schema()), PipelineConfig::default());

    let output = h
        .pipeline
        .run("how many orders last month", context(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(output.mode, Some(ExecutionMode::Metrics));
    assert_eq!(output.data.unwrap().row_count, 0);
    assert!(!h.adapter.called("narrative"));
    let assumptions = output
        .narrative_sections
        .iter()
        .find(|s| s.section_type == SectionType::Assumptions)
        .unwrap();
    assert!(assumptions.content.contains("SQL mode returned no rows"));
}
