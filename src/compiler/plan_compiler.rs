//! Plan Compiler - Deterministic SQL from a validated query plan
//!
//! Pure and synchronous. The model never writes SQL on this path: every
//! expression comes from the registry, every value is a bound parameter.

use crate::catalog::registry::{validate_plan, DimensionDef, DimensionType, MetricDef, RegistryCatalog};
use crate::error::{NlqError, Result};
use crate::intent::types::{Filter, FilterOperator, QueryPlan};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub tenant_id: String,
    pub row_limit: usize,
}

impl CompileOptions {
    pub fn new(tenant_id: impl Into<String>, row_limit: usize) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            row_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    pub sql: String,
    /// Positional parameters; `params[0]` is always the tenant id
    pub params: Vec<Value>,
    pub primary_table: String,
    pub join_tables: Vec<String>,
    pub metric_defs: Vec<MetricDef>,
    pub dimension_defs: Vec<DimensionDef>,
    pub warnings: Vec<String>,
    pub row_limit: usize,
}

/// Collects `$n` parameters in order
struct Params(Vec<Value>);

impl Params {
    fn push(&mut self, value: Value) -> String {
        self.0.push(value);
        format!("${}", self.0.len())
    }
}

pub fn compile_plan(plan: &QueryPlan, catalog: &RegistryCatalog, options: &CompileOptions) -> Result<CompiledQuery> {
    let validation = validate_plan(plan, catalog);
    if !validation.valid {
        let code = validation.issues[0].code;
        let message = validation
            .issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(NlqError::compile(code, message));
    }

    let metrics = validation.metrics;
    let dimensions = validation.dimensions;
    let primary = &metrics[0];
    let mut warnings = Vec::new();
    let mut params = Params(Vec::new());

    for metric in &metrics {
        for dim in &dimensions {
            if metric.incompatible_dimensions.contains(&dim.slug) {
                warnings.push(format!(
                    "Metric '{}' is not meaningful when split by '{}'; totals may double count",
                    metric.slug, dim.slug
                ));
            }
        }
    }

    // SELECT list: time bucket, dimensions, then metrics
    let mut select = Vec::new();
    let mut group_positions = Vec::new();

    let bucket = match (plan.time_granularity, primary.date_column.as_deref()) {
        (Some(granularity), Some(date_column)) => {
            select.push(format!(
                "DATE_TRUNC('{}', {})::date AS period",
                granularity.as_str(),
                date_column
            ));
            group_positions.push(select.len());
            true
        }
        (Some(granularity), None) => {
            warnings.push(format!(
                "Metric '{}' has no date column; '{}' granularity ignored",
                primary.slug,
                granularity.as_str()
            ));
            false
        }
        _ => false,
    };

    for dim in &dimensions {
        select.push(format!("{} AS {}", dim.sql_expression, quote_ident(&dim.slug)));
        group_positions.push(select.len());
    }
    for metric in &metrics {
        select.push(format!("{} AS {}", metric.sql_expression, quote_ident(&metric.slug)));
    }

    // Joins for dimensions (selected or filtered) outside the primary table
    let filter_dims: Vec<&DimensionDef> = plan
        .filters
        .iter()
        .filter_map(|f| catalog.dimension(&f.field))
        .collect();
    let mut joins: Vec<String> = Vec::new();
    let mut join_tables: Vec<String> = Vec::new();
    for dim in dimensions.iter().chain(filter_dims.iter().copied()) {
        if dim.table == primary.table {
            continue;
        }
        if let Some(join_sql) = &dim.join_sql {
            if !joins.contains(join_sql) {
                joins.push(join_sql.clone());
                join_tables.push(dim.table.clone());
            }
        }
    }

    // WHERE: tenant predicate first
    let mut predicates = vec![format!(
        "{} = {}",
        primary.tenant_column,
        params.push(json!(options.tenant_id))
    )];

    if let Some(range) = plan.date_range {
        match primary.date_column.as_deref() {
            Some(date_column) => {
                let start = params.push(json!(range.start.to_string()));
                let end = params.push(json!((range.end + Duration::days(1)).to_string()));
                predicates.push(format!(
                    "{col} >= {start}::date AND {col} < {end}::date",
                    col = date_column
                ));
            }
            None => warnings.push(format!(
                "Metric '{}' has no date column; date range ignored",
                primary.slug
            )),
        }
    }

    for filter in &plan.filters {
        if let Some(dim) = catalog.dimension(&filter.field) {
            predicates.push(filter_predicate(filter, dim, &mut params));
        }
    }

    let mut sql = format!("SELECT {}\nFROM {}", select.join(", "), primary.table);
    for join in &joins {
        sql.push('\n');
        sql.push_str(join);
    }
    sql.push_str(&format!("\nWHERE {}", predicates.join("\n  AND ")));
    if !group_positions.is_empty() {
        sql.push_str(&format!(
            "\nGROUP BY {}",
            group_positions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if bucket {
        sql.push_str("\nORDER BY 1 ASC");
    } else {
        sql.push_str(&format!("\nORDER BY {} DESC", quote_ident(&metrics[0].slug)));
    }
    sql.push_str(&format!("\nLIMIT {}", options.row_limit + 1));

    debug!(sql = %sql, params = params.0.len(), "Compiled plan");

    Ok(CompiledQuery {
        sql,
        params: params.0,
        primary_table: primary.table.clone(),
        join_tables,
        metric_defs: metrics.clone(),
        dimension_defs: dimensions,
        warnings,
        row_limit: options.row_limit,
    })
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn text_value(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn filter_predicate(filter: &Filter, dim: &DimensionDef, params: &mut Params) -> String {
    let (lhs, cast) = match dim.data_type {
        DimensionType::Text => (format!("({})::text", dim.sql_expression), "text"),
        DimensionType::Number => (dim.sql_expression.clone(), "numeric"),
        DimensionType::Date => (dim.sql_expression.clone(), "date"),
        DimensionType::Boolean => (dim.sql_expression.clone(), "boolean"),
    };
    let scalar = |v: &Value| match dim.data_type {
        DimensionType::Text | DimensionType::Date => text_value(v),
        _ => v.clone(),
    };

    let comparison = |op: &str, params: &mut Params| {
        let p = params.push(scalar(&filter.value));
        format!("{} {} {}::{}", lhs, op, p, cast)
    };

    match filter.operator {
        FilterOperator::Eq => comparison("=", params),
        FilterOperator::Neq => comparison("<>", params),
        FilterOperator::Gt => comparison(">", params),
        FilterOperator::Gte => comparison(">=", params),
        FilterOperator::Lt => comparison("<", params),
        FilterOperator::Lte => comparison("<=", params),
        FilterOperator::In | FilterOperator::NotIn => {
            let items: Vec<Value> = filter
                .value
                .as_array()
                .map(|a| a.iter().map(|v| scalar(v)).collect())
                .unwrap_or_default();
            let p = params.push(Value::Array(items));
            let any = format!("{} = ANY({}::{}[])", lhs, p, cast);
            if filter.operator == FilterOperator::NotIn {
                format!("NOT ({})", any)
            } else {
                any
            }
        }
        FilterOperator::Contains => {
            let needle = filter.value.as_str().unwrap_or_default();
            let p = params.push(json!(format!("%{}%", escape_like(needle))));
            format!("{} ILIKE {}", lhs, p)
        }
    }
}
