//! PII masking for rows sent to the narrative model

use crate::execution::result::Row;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref CARD: Regex = Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap();
    static ref PHONE: Regex = Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap();
}

pub trait PiiMasker: Send + Sync {
    fn mask_rows(&self, rows: &[Row]) -> Vec<Row>;
}

/// Masks emails, card numbers and phone numbers inside string values, and
/// blanks columns whose names mark them as personal data
pub struct RegexPiiMasker {
    sensitive_columns: Vec<String>,
}

impl RegexPiiMasker {
    pub fn new() -> Self {
        Self {
            sensitive_columns: ["email", "phone", "phone_number", "ssn", "card_number", "iban"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn mask_text(&self, text: &str) -> String {
        let masked = EMAIL.replace_all(text, "[email]");
        let masked = CARD.replace_all(&masked, "[card]");
        PHONE.replace_all(&masked, "[phone]").into_owned()
    }

    fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.mask_text(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.mask_value(v)).collect()),
            Value::Object(map) => Value::Object(self.mask_row(map)),
            other => other.clone(),
        }
    }

    fn mask_row(&self, row: &Row) -> Row {
        row.iter()
            .map(|(column, value)| {
                let lower = column.to_lowercase();
                let masked = if !value.is_null() && self.sensitive_columns.iter().any(|c| lower == *c) {
                    Value::String("[redacted]".to_string())
                } else {
                    self.mask_value(value)
                };
                (column.clone(), masked)
            })
            .collect()
    }
}

impl Default for RegexPiiMasker {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiMasker for RegexPiiMasker {
    fn mask_rows(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter().map(|r| self.mask_row(r)).collect()
    }
}
