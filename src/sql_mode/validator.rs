//! Generated SQL Validator
//!
//! Deny-by-default gate in front of the executor. A statement passes only if
//! it parses as exactly one read-only query, uses no forbidden keywords or
//! functions, and reads only tables present in the schema catalog.

use crate::catalog::schema::SchemaCatalog;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::debug;

lazy_static! {
    static ref STRING_LITERAL: Regex = Regex::new(r"'(?:[^']|'')*'").unwrap();
    static ref DOLLAR_QUOTED: Regex = Regex::new(r"(?s)\$([A-Za-z_]*)\$.*?\$([A-Za-z_]*)\$").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"--[^\n]*").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref QUOTED_IDENT: Regex = Regex::new(r#""(?:[^"]|"")*""#).unwrap();
    static ref TENANT_PARAM: Regex = Regex::new(r"\$1\b").unwrap();
    static ref FORBIDDEN_KEYWORD: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|UPSERT|DROP|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|COPY|VACUUM|CALL|EXECUTE|PREPARE|DEALLOCATE|LISTEN|NOTIFY|UNLISTEN|REINDEX|REFRESH|IMPORT)\b"
    )
    .unwrap();
}

const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
    "set_config",
    "query_to_xml",
    "nextval",
    "setval",
    "txid_current",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Present only when `valid`
    pub sanitized_sql: Option<String>,
}

impl SqlValidation {
    fn rejected(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            sanitized_sql: None,
        }
    }
}

/// Replace literals, comments and quoted identifiers so keyword matching
/// only sees SQL structure
fn strip_literals(sql: &str) -> String {
    let s = BLOCK_COMMENT.replace_all(sql, " ");
    let s = LINE_COMMENT.replace_all(&s, " ");
    let s = DOLLAR_QUOTED.replace_all(&s, "''");
    let s = STRING_LITERAL.replace_all(&s, "''");
    QUOTED_IDENT.replace_all(&s, "\"_\"").into_owned()
}

/// Whether the statement uses the `$1` tenant placeholder outside literals
pub fn references_tenant_param(sql: &str) -> bool {
    TENANT_PARAM.is_match(&strip_literals(sql))
}

#[derive(Default)]
struct ReferenceCollector {
    cte_names: HashSet<String>,
    relations: Vec<String>,
    functions: Vec<String>,
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Derived { subquery, .. } = table_factor {
            collect_cte_names(subquery, &mut self.cte_names);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        let name = relation
            .0
            .iter()
            .map(|ident| ident.value.clone())
            .collect::<Vec<_>>()
            .join(".");
        self.relations.push(name);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => {
                if let Some(last) = function.name.0.last() {
                    self.functions.push(last.value.to_lowercase());
                }
            }
            Expr::Subquery(subquery)
            | Expr::ArraySubquery(subquery)
            | Expr::Exists { subquery, .. }
            | Expr::InSubquery { subquery, .. } => collect_cte_names(subquery, &mut self.cte_names),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// CTE names declared by `query` and its nested set expressions
fn collect_cte_names(query: &Query, names: &mut HashSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            names.insert(cte.alias.name.value.to_lowercase());
            collect_cte_names(&cte.query, names);
        }
    }
    collect_set_expr_ctes(&query.body, names);
}

fn collect_set_expr_ctes(body: &SetExpr, names: &mut HashSet<String>) {
    match body {
        SetExpr::Query(query) => collect_cte_names(query, names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_ctes(left, names);
            collect_set_expr_ctes(right, names);
        }
        _ => {}
    }
}

fn has_select_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => has_select_into(&query.body),
        SetExpr::SetOperation { left, right, .. } => has_select_into(left) || has_select_into(right),
        _ => false,
    }
}

pub fn validate_generated_sql(sql: &str, schema: &SchemaCatalog, max_rows: usize) -> SqlValidation {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return SqlValidation::rejected(vec!["SQL is empty".to_string()]);
    }

    let statements = match Parser::parse_sql(&PostgreSqlDialect {}, trimmed) {
        Ok(statements) => statements,
        Err(e) => return SqlValidation::rejected(vec![format!("SQL parse error: {}", e)]),
    };

    if statements.len() != 1 {
        return SqlValidation::rejected(vec![format!(
            "Only a single statement is allowed, found {}",
            statements.len()
        )]);
    }

    let mut errors = Vec::new();
    let query = match &statements[0] {
        Statement::Query(query) => query,
        other => {
            let kind = other.to_string();
            let keyword = kind.split_whitespace().next().unwrap_or("statement");
            return SqlValidation::rejected(vec![format!(
                "Only SELECT statements are allowed, found {}",
                keyword.to_uppercase()
            )]);
        }
    };

    if has_select_into(&query.body) {
        errors.push("SELECT INTO is not allowed".to_string());
    }
    if !query.locks.is_empty() {
        errors.push("Row locking clauses (FOR UPDATE/SHARE) are not allowed".to_string());
    }

    let structural = strip_literals(trimmed);
    let mut seen_keywords = HashSet::new();
    for m in FORBIDDEN_KEYWORD.find_iter(&structural) {
        let keyword = m.as_str().to_uppercase();
        if seen_keywords.insert(keyword.clone()) {
            errors.push(format!("Keyword {} is not allowed", keyword));
        }
    }

    let mut collector = ReferenceCollector::default();
    collect_cte_names(query, &mut collector.cte_names);
    let _ = statements[0].visit(&mut collector);

    for function in &collector.functions {
        if FORBIDDEN_FUNCTIONS.contains(&function.as_str()) {
            errors.push(format!("Function {}() is not allowed", function));
        }
    }

    let mut unknown = HashSet::new();
    for relation in &collector.relations {
        let lower = relation.to_lowercase();
        let is_cte = !lower.contains('.') && collector.cte_names.contains(&lower);
        if !is_cte && !schema.contains_table(&lower) && unknown.insert(lower.clone()) {
            errors.push(format!("Table '{}' is not in the schema", relation));
        }
    }

    if !errors.is_empty() {
        debug!(?errors, "Generated SQL rejected");
        return SqlValidation::rejected(errors);
    }

    let sanitized_sql = if query.limit.is_none() && query.fetch.is_none() {
        format!("{}\nLIMIT {}", trimmed, max_rows)
    } else {
        trimmed.to_string()
    };

    SqlValidation {
        valid: true,
        errors: Vec::new(),
        sanitized_sql: Some(sanitized_sql),
    }
}
