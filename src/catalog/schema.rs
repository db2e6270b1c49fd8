//! Schema Catalog
//!
//! Raw database schema used to ground SQL-mode generation and to build the
//! validator's table allow-list.

use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub tables: Vec<TableSchema>,
    /// Lowercased bare and schema-qualified names
    pub table_names: HashSet<String>,
    /// One line per table listing column names
    pub summary_text: String,
    /// Column names with types and nullability
    pub full_text: String,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        let mut table_names = HashSet::new();
        for t in &tables {
            table_names.insert(t.name.to_lowercase());
            table_names.insert(t.qualified_name().to_lowercase());
        }

        let summary_text = tables
            .iter()
            .map(|t| {
                format!(
                    "{}({})",
                    t.qualified_name(),
                    t.columns.iter().map(|c| c.name.as_str()).join(", ")
                )
            })
            .join("\n");

        let full_text = tables
            .iter()
            .map(|t| {
                let cols = t
                    .columns
                    .iter()
                    .map(|c| {
                        format!(
                            "  - {} {}{}",
                            c.name,
                            c.data_type,
                            if c.nullable { "" } else { " NOT NULL" }
                        )
                    })
                    .join("\n");
                format!("TABLE {}\n{}", t.qualified_name(), cols)
            })
            .join("\n\n");

        Self {
            tables,
            table_names,
            summary_text,
            full_text,
        }
    }

    /// Accepts `name` or `schema.name`, case-insensitive; quotes are ignored
    pub fn contains_table(&self, name: &str) -> bool {
        let normalized = name.replace('"', "").to_lowercase();
        self.table_names.contains(&normalized)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn build_schema_catalog(&self) -> Result<SchemaCatalog>;
}

/// Fixed schema, for tests and offline validation
pub struct StaticSchemaProvider {
    catalog: SchemaCatalog,
}

impl StaticSchemaProvider {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            catalog: SchemaCatalog::new(tables),
        }
    }
}

#[async_trait]
impl SchemaProvider for StaticSchemaProvider {
    async fn build_schema_catalog(&self) -> Result<SchemaCatalog> {
        Ok(self.catalog.clone())
    }
}

/// Reads `information_schema.columns` for the configured schemas
pub struct PgSchemaProvider {
    pool: PgPool,
    schemas: Vec<String>,
    excluded_tables: HashSet<String>,
}

impl PgSchemaProvider {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            schemas: config.schemas.clone(),
            excluded_tables: config
                .excluded_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl SchemaProvider for PgSchemaProvider {
    async fn build_schema_catalog(&self) -> Result<SchemaCatalog> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT table_schema::text, table_name::text, column_name::text,
                   data_type::text, is_nullable::text
            FROM information_schema.columns
            WHERE table_schema = ANY($1)
            ORDER BY table_schema, table_name, ordinal_position
            "#,
        )
        .bind(&self.schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::new();
        for ((schema, name), group) in &rows
            .into_iter()
            .group_by(|(schema, table, _, _, _)| (schema.clone(), table.clone()))
        {
            if self.excluded_tables.contains(&name.to_lowercase())
                || self
                    .excluded_tables
                    .contains(&format!("{}.{}", schema, name).to_lowercase())
            {
                continue;
            }
            let columns = group
                .map(|(_, _, column, data_type, nullable)| ColumnSchema {
                    name: column,
                    data_type,
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                })
                .collect();
            tables.push(TableSchema {
                schema,
                name,
                columns,
            });
        }

        info!(tables = tables.len(), schemas = ?self.schemas, "Built schema catalog");
        Ok(SchemaCatalog::new(tables))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_schema() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TableSchema {
                schema: "public".into(),
                name: "orders".into(),
                columns: vec![
                    ColumnSchema { name: "id".into(), data_type: "bigint".into(), nullable: false },
                    ColumnSchema { name: "tenant_id".into(), data_type: "text".into(), nullable: false },
                    ColumnSchema { name: "net_amount".into(), data_type: "numeric".into(), nullable: true },
                    ColumnSchema { name: "ordered_at".into(), data_type: "timestamptz".into(), nullable: false },
                ],
            },
            TableSchema {
                schema: "public".into(),
                name: "customers".into(),
                columns: vec![
                    ColumnSchema { name: "id".into(), data_type: "bigint".into(), nullable: false },
                    ColumnSchema { name: "email".into(), data_type: "text".into(), nullable: true },
                ],
            },
        ])
    }

    #[test]
    fn test_table_lookup_is_case_and_schema_insensitive() {
        let schema = sample_schema();
        assert!(schema.contains_table("orders"));
        assert!(schema.contains_table("PUBLIC.Orders"));
        assert!(schema.contains_table("\"orders\""));
        assert!(!schema.contains_table("payroll"));
    }

    #[test]
    fn test_descriptions() {
        let schema = sample_schema();
        assert!(schema.summary_text.contains("public.orders(id, tenant_id, net_amount, ordered_at)"));
        assert!(schema.full_text.contains("  - id bigint NOT NULL"));
    }
}
