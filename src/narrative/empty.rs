//! Deterministic narrative for questions that produced no data

use crate::intent::types::QueryPlan;
use crate::narrative::types::{NarrativeResult, Section, SectionType};

/// Built without a model call; reports zero tokens
pub fn build_empty_result_narrative(
    question: &str,
    plan: Option<&QueryPlan>,
    issues: &[String],
) -> NarrativeResult {
    let mut sections = Vec::new();

    let answer = if issues.is_empty() {
        format!(
            "I ran the analysis for \"{}\" but found no matching data for the requested scope.",
            question.trim()
        )
    } else {
        format!(
            "I couldn't find data to answer \"{}\". What went wrong along the way is listed below.",
            question.trim()
        )
    };
    sections.push(Section::new(SectionType::Answer, answer));

    let mut wins = vec![
        "- Widen the date range or remove the most restrictive filter.".to_string(),
        "- Check that recent data has been loaded for this account.".to_string(),
    ];
    match plan {
        Some(plan) if !plan.metrics.is_empty() => wins.push(format!(
            "- Try a related metric, or the same metric ({}) without breakdowns.",
            plan.metrics.join(", ")
        )),
        _ => wins.push("- Name the metric you care about, e.g. \"net sales by week\".".to_string()),
    }
    sections.push(Section::new(SectionType::QuickWins, wins.join("\n")));

    if !issues.is_empty() {
        let listed: Vec<String> = issues.iter().map(|i| format!("- {}", i)).collect();
        sections.push(Section::new(SectionType::Assumptions, listed.join("\n")));
    }

    let sources = match plan {
        Some(plan) if !plan.metrics.is_empty() => {
            format!("Registry metrics: {}. No rows returned.", plan.metrics.join(", "))
        }
        _ => "No data source was queried.".to_string(),
    };
    sections.push(Section::new(SectionType::DataSources, sources));

    let text = sections
        .iter()
        .filter(|s| s.section_type != SectionType::DataSources)
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    NarrativeResult {
        text,
        sections,
        tokens_input: 0,
        tokens_output: 0,
        latency_ms: 0,
    }
}
