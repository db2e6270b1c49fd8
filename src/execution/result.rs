//! Query Result - Standardized row set returned by every executor
//!
//! Rows are kept as JSON objects (column order preserved) so the same value
//! flows unchanged into caching, narration and the pipeline output.

use serde::{Deserialize, Serialize};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in select order
    pub columns: Vec<String>,

    pub rows: Vec<Row>,

    /// Number of rows returned (after truncation)
    pub row_count: usize,

    pub execution_time_ms: u64,

    /// The statement produced more rows than its row limit
    pub truncated: bool,
}

impl QueryResult {
    /// Build a result from fetched rows, cutting at `row_limit`.
    ///
    /// Executors fetch `row_limit + 1` rows; the extra row only signals
    /// truncation and is discarded here.
    pub fn from_rows(mut rows: Vec<Row>, row_limit: usize, execution_time_ms: u64) -> Self {
        let truncated = rows.len() > row_limit;
        rows.truncate(row_limit);
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            columns,
            row_count: rows.len(),
            rows,
            execution_time_ms,
            truncated,
        }
    }

    pub fn empty(execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms,
            truncated: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Render the first `max_rows` rows as a markdown table
    pub fn to_markdown_table(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return "(no rows)".to_string();
        }
        let mut out = String::new();
        out.push_str(&format!("| {} |\n", self.columns.join(" | ")));
        out.push_str(&format!(
            "|{}|\n",
            self.columns.iter().map(|_| "---").collect::<Vec<_>>().join("|")
        ));
        for row in self.rows.iter().take(max_rows) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| render_cell(row.get(c)))
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        if self.row_count > max_rows {
            out.push_str(&format!("\n({} more rows not shown)\n", self.row_count - max_rows));
        }
        out
    }
}

fn render_cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.replace('|', "\\|"),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_extra_row_marks_truncation() {
        let rows = vec![row(json!({"a": 1})), row(json!({"a": 2})), row(json!({"a": 3}))];
        let result = QueryResult::from_rows(rows, 2, 5);
        assert!(result.truncated);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns, vec!["a".to_string()]);
    }

    #[test]
    fn test_markdown_table_keeps_column_order() {
        let rows = vec![row(json!({"day": "2024-05-01", "net_sales": 120.5}))];
        let result = QueryResult::from_rows(rows, 10, 1);
        let table = result.to_markdown_table(10);
        assert!(table.starts_with("| day | net_sales |"));
        assert!(table.contains("| 2024-05-01 | 120.5 |"));
    }
}
