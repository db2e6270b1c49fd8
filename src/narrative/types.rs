//! Narrative result types

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Answer,
    Options,
    Recommendation,
    QuickWins,
    RoiSnapshot,
    WhatToTrack,
    Risk,
    Assumptions,
    ConversationDriver,
    DataSources,
    Takeaway,
    Action,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Answer => "answer",
            SectionType::Options => "options",
            SectionType::Recommendation => "recommendation",
            SectionType::QuickWins => "quick_wins",
            SectionType::RoiSnapshot => "roi_snapshot",
            SectionType::WhatToTrack => "what_to_track",
            SectionType::Risk => "risk",
            SectionType::Assumptions => "assumptions",
            SectionType::ConversationDriver => "conversation_driver",
            SectionType::DataSources => "data_sources",
            SectionType::Takeaway => "takeaway",
            SectionType::Action => "action",
        }
    }

    /// Parse a section label; anything unrecognized is an answer
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "options" => SectionType::Options,
            "recommendation" => SectionType::Recommendation,
            "quick_wins" => SectionType::QuickWins,
            "roi_snapshot" => SectionType::RoiSnapshot,
            "what_to_track" => SectionType::WhatToTrack,
            "risk" => SectionType::Risk,
            "assumptions" => SectionType::Assumptions,
            "conversation_driver" => SectionType::ConversationDriver,
            "data_sources" => SectionType::DataSources,
            "takeaway" => SectionType::Takeaway,
            "action" => SectionType::Action,
            _ => SectionType::Answer,
        }
    }
}

impl<'de> Deserialize<'de> for SectionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(SectionType::from_label(&label))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub content: String,
}

impl Section {
    pub fn new(section_type: SectionType, content: impl Into<String>) -> Self {
        Self {
            section_type,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeResult {
    pub text: String,
    /// Always contains at least one `answer` section
    pub sections: Vec<Section>,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
}

impl NarrativeResult {
    pub fn section(&self, section_type: SectionType) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_type == section_type)
    }

    pub fn has_answer(&self) -> bool {
        self.section(SectionType::Answer).is_some()
    }
}

/// Guarantee an `answer` section, borrowing the first paragraph of the
/// first other section when the model did not write one
pub fn ensure_answer(sections: &mut Vec<Section>, fallback_text: &str) {
    if sections.iter().any(|s| s.section_type == SectionType::Answer) {
        return;
    }
    let source = sections
        .iter()
        .find(|s| s.section_type != SectionType::DataSources)
        .map(|s| s.content.as_str())
        .unwrap_or(fallback_text);
    let first_paragraph = source
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty())
        .unwrap_or("")
        .to_string();
    let content = if first_paragraph.is_empty() {
        fallback_text.trim().to_string()
    } else {
        first_paragraph
    };
    sections.insert(0, Section::new(SectionType::Answer, content));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_section_type_is_answer() {
        let s: Section = serde_json::from_str(r#"{"type": "summary", "content": "x"}"#).unwrap();
        assert_eq!(s.section_type, SectionType::Answer);
        let s: Section = serde_json::from_str(r#"{"type": "insight", "content": "x"}"#).unwrap();
        assert_eq!(s.section_type, SectionType::Answer);
        let s: Section = serde_json::from_str(r#"{"type": "quick_wins", "content": "x"}"#).unwrap();
        assert_eq!(s.section_type, SectionType::QuickWins);
    }

    #[test]
    fn test_section_type_round_trips_as_snake_case() {
        let json = serde_json::to_string(&Section::new(SectionType::RoiSnapshot, "x")).unwrap();
        assert!(json.contains(r#""type":"roi_snapshot""#));
        let back: Section = serde_json::from_str(&json).unwrap();
        assert_eq!(back.section_type, SectionType::RoiSnapshot);
    }

    #[test]
    fn test_ensure_answer_inserts_first() {
        let mut sections = vec![Section::new(SectionType::Risk, "Churn is rising.\n\nDetails...")];
        ensure_answer(&mut sections, "");
        assert_eq!(sections[0].section_type, SectionType::Answer);
        assert_eq!(sections[0].content, "Churn is rising.");
    }
}
