//! Pipeline Metrics
//!
//! In-process counters for invocations, modes, fallbacks, error classes and
//! per-stage latency.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl LatencyStats {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub clarifications: u64,
    pub sql_fallbacks: u64,
    pub mode_counts: HashMap<String, u64>,
    pub metric_usage: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
    pub stage_latency: HashMap<String, LatencyStats>,
}

/// Pipeline metrics tracker
pub struct PipelineMetrics {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    fn with<F: FnOnce(&mut MetricsSnapshot)>(&self, f: F) {
        let mut snapshot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut snapshot);
    }

    pub fn record_invocation(&self) {
        self.with(|s| s.invocations += 1);
    }

    pub fn record_clarification(&self) {
        self.with(|s| s.clarifications += 1);
    }

    pub fn record_sql_fallback(&self) {
        self.with(|s| s.sql_fallbacks += 1);
    }

    pub fn record_mode(&self, mode: &str) {
        self.with(|s| *s.mode_counts.entry(mode.to_string()).or_insert(0) += 1);
    }

    pub fn record_metric_usage(&self, metric_slug: &str) {
        self.with(|s| *s.metric_usage.entry(metric_slug.to_string()).or_insert(0) += 1);
    }

    pub fn record_error(&self, error_class: &str) {
        self.with(|s| *s.error_counts.entry(error_class.to_string()).or_insert(0) += 1);
    }

    pub fn record_stage_latency(&self, stage: &str, elapsed_ms: u64) {
        self.with(|s| {
            let stats = s.stage_latency.entry(stage.to_string()).or_default();
            stats.count += 1;
            stats.total_ms += elapsed_ms;
            stats.max_ms = stats.max_ms.max(elapsed_ms);
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_latency_average() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage_latency("intent", 10);
        metrics.record_stage_latency("intent", 30);
        let snapshot = metrics.snapshot();
        let stats = &snapshot.stage_latency["intent"];
        assert_eq!(stats.avg_ms(), 20.0);
        assert_eq!(stats.max_ms, 30);
    }

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_mode("sql");
        metrics.record_mode("sql");
        metrics.record_error("NO_METRICS");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mode_counts["sql"], 2);
        assert_eq!(snapshot.error_counts["NO_METRICS"], 1);
    }
}
