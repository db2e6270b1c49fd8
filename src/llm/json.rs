//! Helpers for JSON-only model responses

use crate::error::{NlqError, Result};
use serde::de::DeserializeOwned;

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````)
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    // Drop the opening fence line including any language tag
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed.trim_start_matches('`'),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Strip fences and deserialize; `context` names the stage for the error
pub fn parse_json_response<T: DeserializeOwned>(content: &str, context: &str) -> Result<T> {
    let cleaned = strip_code_fences(content);
    serde_json::from_str(cleaned).map_err(|e| {
        NlqError::Json(format!(
            "Failed to parse {} response: {}. Response: {}",
            context,
            e,
            truncate_for_log(cleaned, 500)
        ))
    })
}

pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}
