//! Intent Resolver
//!
//! One model call turns a question into a `QueryPlan` over registry slugs,
//! or into a clarifying question when the request is ambiguous.

use crate::catalog::registry::{LensDef, RegistryCatalog};
use crate::error::{NlqError, Result};
use crate::intent::types::{IntentContext, QueryPlan, ResolvedIntent};
use crate::llm::adapter::{ChatMessage, ChatRole, CompletionOptions, LlmAdapter};
use crate::llm::json::{strip_code_fences, truncate_for_log};
use serde::Deserialize;
use tracing::{info, warn};

/// Prior user turns included in the prompt
const MAX_HISTORY_TURNS: usize = 6;

pub const DEFAULT_CLARIFICATION: &str =
    "Could you clarify which metric and time period you're interested in?";

#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default)]
    plan: Option<QueryPlan>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(
        default,
        alias = "needs_clarification",
        alias = "isClarification",
        alias = "clarificationNeeded",
        alias = "clarification_needed"
    )]
    is_clarification: bool,
    #[serde(default, alias = "clarification", alias = "clarificationText")]
    clarification_text: Option<String>,
}

fn system_prompt(catalog: &RegistryCatalog, lens: Option<&LensDef>, context: &IntentContext) -> String {
    let mut prompt = format!(
        r#"You translate business questions into query plans over a metrics registry.
Use ONLY the metric and dimension slugs listed below. Today's date is {today}.
Resolve relative dates ("last month", "yesterday") into explicit ISO dates.

{catalog}
Respond with ONLY a JSON object of this shape:
{{
  "plan": {{
    "metrics": ["metric_slug"],
    "dimensions": ["dimension_slug"],
    "filters": [{{"field": "dimension_slug", "operator": "eq|neq|gt|gte|lt|lte|in|not_in|contains", "value": "..."}}],
    "date_range": {{"start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}} or null,
    "time_granularity": "day|week|month|quarter|year" or null,
    "intent": "one sentence restating the question",
    "rationale": "why these metrics and dimensions"
  }},
  "confidence": 0.0 to 1.0,
  "needs_clarification": false,
  "clarification": null
}}
If the question is too ambiguous to plan, set "plan" to null, "needs_clarification" to true and put one short question in "clarification"."#,
        today = context.current_date,
        catalog = catalog.describe_for_prompt(),
    );
    if let Some(lens) = lens {
        prompt.push_str(&format!("\n\nANALYSIS LENS ({}):\n{}", lens.name, lens.prompt_fragment));
    }
    prompt
}

/// Only the user's side of the conversation is replayed
fn build_messages(
    question: &str,
    context: &IntentContext,
    catalog: &RegistryCatalog,
    lens: Option<&LensDef>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(catalog, lens, context))];
    let user_turns: Vec<_> = context
        .history
        .iter()
        .filter(|t| t.role == ChatRole::User)
        .collect();
    let skip = user_turns.len().saturating_sub(MAX_HISTORY_TURNS);
    for turn in user_turns.into_iter().skip(skip) {
        messages.push(ChatMessage::user(turn.content.clone()));
    }
    messages.push(ChatMessage::user(question));
    messages
}

fn clamp_confidence(raw: Option<&serde_json::Value>) -> f64 {
    let value = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub async fn resolve_intent(
    question: &str,
    context: &IntentContext,
    catalog: &RegistryCatalog,
    lens: Option<&LensDef>,
    adapter: &dyn LlmAdapter,
    model: Option<&str>,
) -> Result<ResolvedIntent> {
    let messages = build_messages(question, context, catalog, lens);
    let mut options = CompletionOptions::for_purpose("intent")
        .with_temperature(0.0)
        .with_scope(context.tenant_id.clone());
    if let Some(model) = model {
        options = options.with_model(model);
    }

    let response = adapter.complete(&messages, &options).await?;
    let cleaned = strip_code_fences(&response.content);
    let parsed: IntentResponse = serde_json::from_str(cleaned).map_err(|e| {
        warn!(error = %e, "Intent response was not a valid plan document");
        NlqError::IntentParse(format!(
            "{}. Response: {}",
            e,
            truncate_for_log(cleaned, 300)
        ))
    })?;

    let confidence = clamp_confidence(parsed.confidence.as_ref());
    let is_clarification = parsed.is_clarification || parsed.plan.is_none();
    let clarification_text = if is_clarification {
        Some(
            parsed
                .clarification_text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CLARIFICATION.to_string()),
        )
    } else {
        None
    };

    info!(
        tenant = %context.tenant_id,
        confidence,
        is_clarification,
        metrics = ?parsed.plan.as_ref().map(|p| &p.metrics),
        "Resolved intent"
    );

    Ok(ResolvedIntent {
        plan: parsed.plan,
        confidence,
        is_clarification,
        clarification_text,
        provider: response.provider,
        model: response.model,
        tokens_input: response.tokens_input,
        tokens_output: response.tokens_output,
        latency_ms: response.latency_ms,
        raw_response: response.content,
    })
}
