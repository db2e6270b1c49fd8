//! Prompt Size Guard
//!
//! Keeps an assembled prompt under a token budget by truncating or dropping
//! optional sections in a fixed priority order. Required sections are never
//! touched.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Approximate characters per token for budget estimation
const CHARS_PER_TOKEN: usize = 4;

/// Optional section kinds, in the order they are sacrificed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Required,
    RetrievalSnippets,
    Examples,
    DataSample,
    Schema,
}

impl SectionKind {
    /// Lower value is dropped first
    fn drop_rank(&self) -> u8 {
        match self {
            SectionKind::RetrievalSnippets => 0,
            SectionKind::Examples => 1,
            SectionKind::DataSample => 2,
            SectionKind::Schema => 3,
            SectionKind::Required => u8::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSection {
    pub name: String,
    pub kind: SectionKind,
    pub content: String,
}

impl PromptSection {
    pub fn required(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SectionKind::Required,
            content: content.into(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: SectionKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedPrompt {
    pub text: String,
    pub estimated_tokens: usize,
    pub was_truncated: bool,
    pub dropped_sections: Vec<String>,
    pub truncated_sections: Vec<String>,
}

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

pub struct PromptGuard {
    token_budget: usize,
}

impl PromptGuard {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    /// Assemble sections (in their given order) into one prompt under budget
    pub fn assemble(&self, sections: Vec<PromptSection>) -> GuardedPrompt {
        let mut sections = sections;
        let mut dropped = Vec::new();
        let mut truncated = Vec::new();

        let mut order: Vec<usize> = (0..sections.len())
            .filter(|&i| sections[i].kind != SectionKind::Required)
            .collect();
        order.sort_by_key(|&i| sections[i].kind.drop_rank());

        for idx in order {
            let total = Self::total_tokens(&sections);
            if total <= self.token_budget {
                break;
            }
            let overflow_chars = (total - self.token_budget) * CHARS_PER_TOKEN;
            let section = &mut sections[idx];
            let len = section.content.chars().count();
            let marker = "\n…[truncated]";
            let marker_len = marker.chars().count();

            if len > overflow_chars + marker_len {
                let keep = len - overflow_chars - marker_len;
                section.content = section.content.chars().take(keep).collect::<String>() + marker;
                truncated.push(section.name.clone());
            } else {
                section.content.clear();
                dropped.push(section.name.clone());
            }
        }

        let text = sections
            .iter()
            .filter(|s| !s.content.is_empty())
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let estimated_tokens = estimate_tokens(&text);
        let was_truncated = !dropped.is_empty() || !truncated.is_empty();
        if was_truncated {
            debug!(
                budget = self.token_budget,
                estimated_tokens,
                ?dropped,
                ?truncated,
                "Prompt exceeded budget, optional sections reduced"
            );
        }

        GuardedPrompt {
            text,
            estimated_tokens,
            was_truncated,
            dropped_sections: dropped,
            truncated_sections: truncated,
        }
    }

    fn total_tokens(sections: &[PromptSection]) -> usize {
        // Separators count as two characters each
        let chars: usize = sections
            .iter()
            .filter(|s| !s.content.is_empty())
            .map(|s| s.content.chars().count() + 2)
            .sum();
        (chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
    }
}
