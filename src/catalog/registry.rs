//! Registry Catalog
//!
//! Metrics, dimensions and analysis lenses known to the metrics path, plus
//! plan validation against that snapshot.

use crate::error::{CompileErrorCode, NlqError, Result};
use crate::intent::types::{FilterOperator, QueryPlan};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Aggregate expression, e.g. `SUM(o.net_amount)`
    pub sql_expression: String,
    /// Source relation including alias, e.g. `orders o`
    pub table: String,
    /// Date column used for date-range predicates and time bucketing
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Dimension slugs this metric should not be sliced by
    #[serde(default)]
    pub incompatible_dimensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    #[default]
    Text,
    Number,
    Date,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDef {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sql_expression: String,
    pub table: String,
    /// Join clause needed when the dimension lives outside the metric table
    #[serde(default)]
    pub join_sql: Option<String>,
    #[serde(default)]
    pub data_type: DimensionType,
    /// Dimension domains; empty means available everywhere
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensDef {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Appended to the intent and narrative system prompts
    pub prompt_fragment: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// On-disk registry document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub metrics: Vec<MetricDef>,
    #[serde(default)]
    pub dimensions: Vec<DimensionDef>,
    #[serde(default)]
    pub lenses: Vec<LensDef>,
}

/// Immutable snapshot handed to one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCatalog {
    pub metrics: Vec<MetricDef>,
    pub dimensions: Vec<DimensionDef>,
    pub lenses: Vec<LensDef>,
    pub generated_at: DateTime<Utc>,
}

impl RegistryCatalog {
    pub fn metric(&self, slug: &str) -> Option<&MetricDef> {
        self.metrics
            .iter()
            .find(|m| m.slug == slug)
            .or_else(|| self.metrics.iter().find(|m| m.slug.eq_ignore_ascii_case(slug)))
    }

    pub fn dimension(&self, slug: &str) -> Option<&DimensionDef> {
        self.dimensions
            .iter()
            .find(|d| d.slug == slug)
            .or_else(|| self.dimensions.iter().find(|d| d.slug.eq_ignore_ascii_case(slug)))
    }

    /// Compact listing used in the intent system prompt
    pub fn describe_for_prompt(&self) -> String {
        let mut out = String::from("METRICS:\n");
        for m in &self.metrics {
            out.push_str(&format!("- {}: {}", m.slug, m.name));
            if !m.description.is_empty() {
                out.push_str(&format!(" ({})", m.description));
            }
            if m.date_column.is_none() {
                out.push_str(" [no date column]");
            }
            out.push('\n');
        }
        out.push_str("\nDIMENSIONS:\n");
        for d in &self.dimensions {
            out.push_str(&format!("- {}: {}", d.slug, d.name));
            if !d.description.is_empty() {
                out.push_str(&format!(" ({})", d.description));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanIssue {
    pub code: CompileErrorCode,
    pub message: String,
}

/// Result of checking a plan against a catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanValidation {
    pub valid: bool,
    pub issues: Vec<PlanIssue>,
    /// Resolved definitions, in plan order
    pub metrics: Vec<MetricDef>,
    pub dimensions: Vec<DimensionDef>,
}

#[async_trait]
pub trait RegistryProvider: Send + Sync {
    async fn build_catalog(&self, domain: Option<&str>) -> Result<RegistryCatalog>;

    async fn get_lens(&self, slug: &str) -> Result<Option<LensDef>>;
}

/// Registry served from an in-memory document (optionally loaded from JSON)
pub struct StaticRegistryProvider {
    document: RegistryDocument,
}

impl StaticRegistryProvider {
    pub fn new(document: RegistryDocument) -> Self {
        Self { document }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: RegistryDocument = serde_json::from_str(json)
            .map_err(|e| NlqError::Catalog(format!("Invalid registry document: {}", e)))?;
        Ok(Self::new(document))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NlqError::Catalog(format!("Failed to read registry {}: {}", path.display(), e))
        })?;
        let provider = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            metrics = provider.document.metrics.len(),
            dimensions = provider.document.dimensions.len(),
            lenses = provider.document.lenses.len(),
            "Loaded registry"
        );
        Ok(provider)
    }
}

#[async_trait]
impl RegistryProvider for StaticRegistryProvider {
    async fn build_catalog(&self, domain: Option<&str>) -> Result<RegistryCatalog> {
        let in_domain = |d: &Option<String>| match (domain, d) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        };
        Ok(RegistryCatalog {
            metrics: self
                .document
                .metrics
                .iter()
                .filter(|m| in_domain(&m.domain))
                .cloned()
                .collect(),
            dimensions: self
                .document
                .dimensions
                .iter()
                .filter(|d| match domain {
                    Some(want) => d.domains.is_empty() || d.domains.iter().any(|x| x == want),
                    None => true,
                })
                .cloned()
                .collect(),
            lenses: self
                .document
                .lenses
                .iter()
                .filter(|l| in_domain(&l.domain))
                .cloned()
                .collect(),
            generated_at: Utc::now(),
        })
    }

    async fn get_lens(&self, slug: &str) -> Result<Option<LensDef>> {
        Ok(self.document.lenses.iter().find(|l| l.slug == slug).cloned())
    }
}

/// Best fuzzy match for an unknown slug
fn suggest<'a>(unknown: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let unknown = unknown.to_lowercase();
    candidates
        .map(|c| (c, strsim::jaro_winkler(&unknown, &c.to_lowercase())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

fn unknown_message(kind: &str, slug: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!("Unknown {} '{}'. Did you mean '{}'?", kind, slug, s),
        None => format!("Unknown {} '{}'", kind, slug),
    }
}

/// Resolve every slug in the plan and check operator/value compatibility
pub fn validate_plan(plan: &QueryPlan, catalog: &RegistryCatalog) -> PlanValidation {
    let mut issues = Vec::new();
    let mut metrics = Vec::new();
    let mut dimensions = Vec::new();

    if plan.metrics.is_empty() {
        issues.push(PlanIssue {
            code: CompileErrorCode::NoMetrics,
            message: "Plan does not reference any metric".to_string(),
        });
    }

    for slug in &plan.metrics {
        match catalog.metric(slug) {
            Some(m) => metrics.push(m.clone()),
            None => issues.push(PlanIssue {
                code: CompileErrorCode::UnknownMetric,
                message: unknown_message(
                    "metric",
                    slug,
                    suggest(slug, catalog.metrics.iter().map(|m| m.slug.as_str())),
                ),
            }),
        }
    }

    for slug in &plan.dimensions {
        match catalog.dimension(slug) {
            Some(d) => dimensions.push(d.clone()),
            None => issues.push(PlanIssue {
                code: CompileErrorCode::UnknownDimension,
                message: unknown_message(
                    "dimension",
                    slug,
                    suggest(slug, catalog.dimensions.iter().map(|d| d.slug.as_str())),
                ),
            }),
        }
    }

    for filter in &plan.filters {
        let Some(dim) = catalog.dimension(&filter.field) else {
            issues.push(PlanIssue {
                code: CompileErrorCode::UnknownFilterField,
                message: unknown_message(
                    "filter field",
                    &filter.field,
                    suggest(&filter.field, catalog.dimensions.iter().map(|d| d.slug.as_str())),
                ),
            });
            continue;
        };
        if let Some(reason) = operator_problem(filter.operator, &filter.value, dim.data_type) {
            issues.push(PlanIssue {
                code: CompileErrorCode::UnsupportedOperator,
                message: format!(
                    "Operator '{}' on '{}': {}",
                    filter.operator.as_str(),
                    filter.field,
                    reason
                ),
            });
        }
    }

    // All metrics must aggregate over one relation
    if let Some(primary) = metrics.first() {
        if let Some(other) = metrics.iter().find(|m| m.table != primary.table) {
            issues.push(PlanIssue {
                code: CompileErrorCode::MixedTables,
                message: format!(
                    "Metrics '{}' ({}) and '{}' ({}) come from different tables",
                    primary.slug, primary.table, other.slug, other.table
                ),
            });
        }

        let filter_dims = plan
            .filters
            .iter()
            .filter_map(|f| catalog.dimension(&f.field));
        for dim in dimensions.iter().chain(filter_dims) {
            if dim.table != primary.table && dim.join_sql.is_none() {
                issues.push(PlanIssue {
                    code: CompileErrorCode::MixedTables,
                    message: format!(
                        "Dimension '{}' lives on {} and has no join to {}",
                        dim.slug, dim.table, primary.table
                    ),
                });
            }
        }
    }

    PlanValidation {
        valid: issues.is_empty(),
        issues,
        metrics,
        dimensions,
    }
}

fn operator_problem(
    operator: FilterOperator,
    value: &serde_json::Value,
    data_type: DimensionType,
) -> Option<&'static str> {
    use serde_json::Value;
    match operator {
        FilterOperator::In | FilterOperator::NotIn => match value {
            Value::Array(items) if !items.is_empty() => None,
            Value::Array(_) => Some("value list is empty"),
            _ => Some("expects a list of values"),
        },
        FilterOperator::Contains => match (value, data_type) {
            (Value::String(_), DimensionType::Text) => None,
            (Value::String(_), _) => Some("only text dimensions support substring matching"),
            _ => Some("expects a string value"),
        },
        op if op.is_ordering() => match (value, data_type) {
            (_, DimensionType::Boolean) => Some("boolean dimensions cannot be ordered"),
            (Value::Array(_) | Value::Object(_) | Value::Null, _) => Some("expects a single value"),
            _ => None,
        },
        _ => match value {
            Value::Array(_) | Value::Object(_) => Some("expects a single value"),
            _ => None,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::intent::types::Filter;
    use serde_json::json;

    pub(crate) fn sample_catalog() -> RegistryCatalog {
        let doc: RegistryDocument = serde_json::from_value(json!({
            "metrics": [
                {"slug": "net_sales", "name": "Net sales", "sql_expression": "SUM(o.net_amount)",
                 "table": "orders o", "date_column": "o.ordered_at",
                 "tenant_column": "o.tenant_id", "incompatible_dimensions": ["product_category"]},
                {"slug": "order_count", "name": "Orders", "sql_expression": "COUNT(*)",
                 "table": "orders o", "date_column": "o.ordered_at", "tenant_column": "o.tenant_id"},
                {"slug": "headcount", "name": "Headcount", "sql_expression": "COUNT(*)",
                 "table": "staff s", "tenant_column": "s.tenant_id"}
            ],
            "dimensions": [
                {"slug": "channel", "name": "Channel", "sql_expression": "o.channel", "table": "orders o"},
                {"slug": "order_total", "name": "Order total", "sql_expression": "o.net_amount",
                 "table": "orders o", "data_type": "number"},
                {"slug": "product_category", "name": "Category", "sql_expression": "p.category",
                 "table": "products p", "join_sql": "JOIN products p ON p.id = o.product_id"},
                {"slug": "store_region", "name": "Region", "sql_expression": "st.region",
                 "table": "stores st"}
            ],
            "lenses": [
                {"slug": "growth", "name": "Growth", "prompt_fragment": "Focus on growth levers."}
            ]
        }))
        .unwrap();
        RegistryCatalog {
            metrics: doc.metrics,
            dimensions: doc.dimensions,
            lenses: doc.lenses,
            generated_at: Utc::now(),
        }
    }

    fn plan(metrics: &[&str], dims: &[&str]) -> QueryPlan {
        QueryPlan {
            metrics: metrics.iter().map(|s| s.to_string()).collect(),
            dimensions: dims.iter().map(|s| s.to_string()).collect(),
            filters: vec![],
            date_range: None,
            time_granularity: None,
            intent: String::new(),
            rationale: String::new(),
        }
    }

    #[test]
    fn test_unknown_metric_gets_suggestion() {
        let v = validate_plan(&plan(&["net_sale"], &[]), &sample_catalog());
        assert!(!v.valid);
        assert_eq!(v.issues[0].code, CompileErrorCode::UnknownMetric);
        assert!(v.issues[0].message.contains("Did you mean 'net_sales'"));
    }

    #[test]
    fn test_empty_metrics_is_no_metrics() {
        let v = validate_plan(&plan(&[], &["channel"]), &sample_catalog());
        assert_eq!(v.issues[0].code, CompileErrorCode::NoMetrics);
    }

    #[test]
    fn test_mixed_tables_detected() {
        let v = validate_plan(&plan(&["net_sales", "headcount"], &[]), &sample_catalog());
        assert!(v.issues.iter().any(|i| i.code == CompileErrorCode::MixedTables));

        let v = validate_plan(&plan(&["net_sales"], &["store_region"]), &sample_catalog());
        assert!(v.issues.iter().any(|i| i.code == CompileErrorCode::MixedTables));

        let v = validate_plan(&plan(&["net_sales"], &["product_category"]), &sample_catalog());
        assert!(v.valid);
    }

    #[test]
    fn test_operator_value_checks() {
        let mut p = plan(&["net_sales"], &[]);
        p.filters.push(Filter {
            field: "channel".into(),
            operator: FilterOperator::In,
            value: json!("web"),
        });
        p.filters.push(Filter {
            field: "coupon".into(),
            operator: FilterOperator::Eq,
            value: json!("x"),
        });
        let v = validate_plan(&p, &sample_catalog());
        let codes: Vec<_> = v.issues.iter().map(|i| i.code).collect();
        assert_eq!(
            codes,
            vec![CompileErrorCode::UnsupportedOperator, CompileErrorCode::UnknownFilterField]
        );
    }

    #[tokio::test]
    async fn test_static_provider_filters_by_domain() {
        let provider = StaticRegistryProvider::from_json_str(
            r#"{"metrics": [
                {"slug": "a", "name": "A", "sql_expression": "1", "table": "t", "domain": "sales"},
                {"slug": "b", "name": "B", "sql_expression": "1", "table": "t", "domain": "hr"}
            ]}"#,
        )
        .unwrap();
        let catalog = provider.build_catalog(Some("sales")).await.unwrap();
        assert_eq!(catalog.metrics.len(), 1);
        assert_eq!(catalog.metrics[0].slug, "a");
        assert!(provider.get_lens("missing").await.unwrap().is_none());
    }
}
