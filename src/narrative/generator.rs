//! Narrative Generator
//!
//! Turns a result set (or the absence of one) into an answer with typed
//! sections. The model is asked for JSON; markdown replies are parsed by
//! heading instead.

use crate::catalog::registry::LensDef;
use crate::error::Result;
use crate::execution::result::QueryResult;
use crate::intent::types::{IntentContext, QueryPlan};
use crate::llm::adapter::{ChatMessage, CompletionOptions, LlmAdapter};
use crate::llm::json::strip_code_fences;
use crate::narrative::markdown::parse_markdown_narrative;
use crate::narrative::types::{ensure_answer, NarrativeResult, Section};
use crate::privacy::pii::PiiMasker;
use crate::resilience::prompt_guard::{PromptGuard, PromptSection, SectionKind};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct NarrativeOptions {
    pub model: Option<String>,
    /// Rows embedded in the prompt table
    pub max_rows: usize,
    pub token_budget: usize,
    pub lens: Option<LensDef>,
    pub masker: Option<Arc<dyn PiiMasker>>,
    /// Non-fatal notes (compiler warnings, fallback errors) to surface
    pub notes: Vec<String>,
}

impl Default for NarrativeOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_rows: 50,
            token_budget: 6_000,
            lens: None,
            masker: None,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NarrativeJson {
    #[serde(default)]
    text: String,
    #[serde(default)]
    sections: Vec<Section>,
}

const RESPONSE_CONTRACT: &str = r#"Respond with ONLY a JSON object:
{"text": "full answer as plain prose", "sections": [{"type": "answer", "content": "..."}]}
Section types: answer, options, recommendation, quick_wins, roi_snapshot, what_to_track, risk, assumptions, conversation_driver, data_sources, takeaway, action.
Always include exactly one "answer" section that directly answers the question first."#;

/// Parse either response format into text + sections
pub fn parse_narrative_content(content: &str) -> (String, Vec<Section>) {
    let cleaned = strip_code_fences(content);
    if let Ok(parsed) = serde_json::from_str::<NarrativeJson>(cleaned) {
        let mut sections = parsed.sections;
        if sections.is_empty() && !parsed.text.trim().is_empty() {
            sections = parse_markdown_narrative(&parsed.text);
        }
        if !sections.is_empty() || !parsed.text.trim().is_empty() {
            let text = if parsed.text.trim().is_empty() {
                sections.iter().map(|s| s.content.as_str()).collect::<Vec<_>>().join("\n\n")
            } else {
                parsed.text
            };
            ensure_answer(&mut sections, &text);
            return (text, sections);
        }
    }
    debug!("Narrative response was not JSON, parsing as markdown");
    (content.trim().to_string(), parse_markdown_narrative(content))
}

fn plan_context(plan: Option<&QueryPlan>) -> String {
    match plan {
        Some(plan) => {
            let mut out = format!("Metrics: {}", plan.metrics.join(", "));
            if !plan.dimensions.is_empty() {
                out.push_str(&format!("\nBroken down by: {}", plan.dimensions.join(", ")));
            }
            if let Some(range) = plan.date_range {
                out.push_str(&format!("\nDate range: {} to {}", range.start, range.end));
            }
            if !plan.intent.is_empty() {
                out.push_str(&format!("\nIntent: {}", plan.intent));
            }
            if !plan.rationale.is_empty() {
                out.push_str(&format!("\nRationale: {}", plan.rationale));
            }
            out
        }
        None => "No structured plan.".to_string(),
    }
}

async fn narrate(
    sections: Vec<PromptSection>,
    question: &str,
    context: &IntentContext,
    adapter: &dyn LlmAdapter,
    options: &NarrativeOptions,
    purpose: &str,
) -> Result<NarrativeResult> {
    let guarded = PromptGuard::new(options.token_budget).assemble(sections);
    let messages = vec![ChatMessage::system(guarded.text), ChatMessage::user(question)];

    let mut completion = CompletionOptions::for_purpose(purpose)
        .with_temperature(0.3)
        .with_max_tokens(1_200)
        .with_scope(context.tenant_id.clone());
    completion.json_mode = false;
    if let Some(model) = &options.model {
        completion = completion.with_model(model.clone());
    }

    let response = adapter.complete(&messages, &completion).await?;
    let (text, sections) = parse_narrative_content(&response.content);
    info!(
        purpose,
        sections = sections.len(),
        prompt_truncated = guarded.was_truncated,
        "Narrative generated"
    );

    Ok(NarrativeResult {
        text,
        sections,
        tokens_input: response.tokens_input,
        tokens_output: response.tokens_output,
        latency_ms: response.latency_ms,
    })
}

fn lens_section(options: &NarrativeOptions) -> Option<PromptSection> {
    options.lens.as_ref().map(|lens| {
        PromptSection::required("lens", format!("ANALYSIS LENS ({}):\n{}", lens.name, lens.prompt_fragment))
    })
}

pub async fn generate_narrative(
    result: &QueryResult,
    plan: Option<&QueryPlan>,
    question: &str,
    context: &IntentContext,
    adapter: &dyn LlmAdapter,
    options: &NarrativeOptions,
) -> Result<NarrativeResult> {
    let masked = match &options.masker {
        Some(masker) => QueryResult {
            rows: masker.mask_rows(&result.rows),
            ..result.clone()
        },
        None => result.clone(),
    };

    let mut sections = vec![PromptSection::required(
        "instructions",
        format!(
            "You are a business analyst explaining query results to a non-technical user. \
             Today's date is {}. Use only the numbers in the data below; do not invent figures.\n{}",
            context.current_date, RESPONSE_CONTRACT
        ),
    )];
    sections.extend(lens_section(options));
    sections.push(PromptSection::required("plan", format!("QUERY PLAN:\n{}", plan_context(plan))));
    let mut data_note = format!(
        "DATA ({} rows{}):\n",
        result.row_count,
        if result.truncated { ", truncated" } else { "" }
    );
    data_note.push_str(&masked.to_markdown_table(options.max_rows));
    sections.push(PromptSection::optional("data", SectionKind::DataSample, data_note));
    if !options.notes.is_empty() {
        sections.push(PromptSection::optional(
            "notes",
            SectionKind::RetrievalSnippets,
            format!("NOTES:\n- {}", options.notes.join("\n- ")),
        ));
    }

    narrate(sections, question, context, adapter, options, "narrative").await
}

/// Advisor mode: no data could be retrieved, answer from expertise and be
/// explicit about it
pub async fn generate_advisor_narrative(
    question: &str,
    plan: Option<&QueryPlan>,
    issues: &[String],
    context: &IntentContext,
    adapter: &dyn LlmAdapter,
    options: &NarrativeOptions,
) -> Result<NarrativeResult> {
    let mut sections = vec![PromptSection::required(
        "instructions",
        format!(
            "You are a business advisor. The user's data could not be queried for this question, \
             so answer from general expertise. State clearly in the answer that no account data was used, \
             include quick_wins and what_to_track sections, and list assumptions. Today's date is {}.\n{}",
            context.current_date, RESPONSE_CONTRACT
        ),
    )];
    sections.extend(lens_section(options));
    sections.push(PromptSection::required("plan", format!("QUERY PLAN:\n{}", plan_context(plan))));
    if !issues.is_empty() {
        sections.push(PromptSection::optional(
            "issues",
            SectionKind::RetrievalSnippets,
            format!("WHY NO DATA:\n- {}", issues.join("\n- ")),
        ));
    }

    narrate(sections, question, context, adapter, options, "advisor").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::types::SectionType;

    #[test]
    fn test_fenced_and_raw_json_narratives_match() {
        let raw = r#"{"text": "Net sales were $1.2M.", "sections": [{"type": "answer", "content": "Net sales were $1.2M."}, {"type": "quick_wins", "content": "- Bundle"}]}"#;
        let fenced = format!("```json\n{}\n```", raw);
        assert_eq!(parse_narrative_content(raw), parse_narrative_content(&fenced));
    }

    #[test]
    fn test_markdown_reply_is_parsed() {
        let (text, sections) = parse_narrative_content("## Answer\nUp 5%.\n\n## Risks\nReturns.");
        assert!(text.starts_with("## Answer"));
        assert_eq!(sections[0].section_type, SectionType::Answer);
        assert_eq!(sections[1].section_type, SectionType::Risk);
    }

    #[test]
    fn test_json_without_answer_gets_one() {
        let (_, sections) = parse_narrative_content(
            r#"{"text": "Try bundles.", "sections": [{"type": "recommendation", "content": "Try bundles."}]}"#,
        );
        assert_eq!(sections[0].section_type, SectionType::Answer);
    }
}
