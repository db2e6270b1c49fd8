//! Markdown narrative parser
//!
//! Fallback for models that answer in markdown instead of the JSON section
//! contract. Headings are mapped onto section types through a fixed
//! vocabulary; a trailing italic line becomes the data-sources footer.

use crate::narrative::types::{ensure_answer, Section, SectionType};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ATX_HEADING: Regex = Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").unwrap();
    static ref BOLD_HEADING: Regex = Regex::new(r"^\s*\*\*([^*]+?)\*\*:?\s*$").unwrap();
    static ref ITALIC_FOOTER: Regex = Regex::new(r"^\s*\*([^*\s][^*]*?)\*\s*$").unwrap();
    static ref HEADING_NOISE: Regex = Regex::new(r"[^a-z0-9\s-]").unwrap();
}

/// Heading vocabulary; matched against the normalized heading text
const HEADING_MAP: &[(&str, SectionType)] = &[
    ("answer", SectionType::Answer),
    ("summary", SectionType::Answer),
    ("options", SectionType::Options),
    ("recommendation", SectionType::Recommendation),
    ("recommendations", SectionType::Recommendation),
    ("quick wins", SectionType::QuickWins),
    ("roi snapshot", SectionType::RoiSnapshot),
    ("what to track", SectionType::WhatToTrack),
    ("metrics", SectionType::WhatToTrack),
    ("metrics to track", SectionType::WhatToTrack),
    ("risks to watch", SectionType::Risk),
    ("risks", SectionType::Risk),
    ("risk", SectionType::Risk),
    ("assumptions", SectionType::Assumptions),
    ("next steps", SectionType::Action),
    ("action", SectionType::Action),
    ("actions", SectionType::Action),
    ("key takeaway", SectionType::Takeaway),
    ("takeaway", SectionType::Takeaway),
    ("follow-up questions", SectionType::ConversationDriver),
    ("follow up questions", SectionType::ConversationDriver),
    ("data sources", SectionType::DataSources),
    ("sources", SectionType::DataSources),
];

fn normalize_heading(heading: &str) -> String {
    let lower = heading.to_lowercase();
    let cleaned = HEADING_NOISE.replace_all(&lower, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn heading_section_type(heading: &str) -> Option<SectionType> {
    let normalized = normalize_heading(heading);
    HEADING_MAP
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, t)| *t)
}

fn heading_text(line: &str) -> Option<&str> {
    ATX_HEADING
        .captures(line)
        .or_else(|| BOLD_HEADING.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn push_section(sections: &mut Vec<Section>, section_type: SectionType, lines: &[&str]) {
    let content = lines.join("\n").trim().to_string();
    if !content.is_empty() {
        sections.push(Section::new(section_type, content));
    }
}

pub fn parse_markdown_narrative(content: &str) -> Vec<Section> {
    let mut lines: Vec<&str> = content.lines().collect();

    // Trailing italic footer → data_sources
    let mut footer = None;
    while lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        lines.pop();
    }
    if let Some(last) = lines.last() {
        if let Some(c) = ITALIC_FOOTER.captures(last) {
            footer = c.get(1).map(|m| m.as_str().trim().to_string());
            lines.pop();
        }
    }

    let mut sections = Vec::new();
    let mut current_type = SectionType::Answer;
    let mut current: Vec<&str> = Vec::new();

    // Only recognized headings open a section; anything else stays as text
    for line in lines {
        match heading_text(line).and_then(heading_section_type) {
            Some(section_type) => {
                push_section(&mut sections, current_type, &current);
                current.clear();
                current_type = section_type;
            }
            None => current.push(line),
        }
    }
    push_section(&mut sections, current_type, &current);

    if let Some(footer) = footer {
        sections.push(Section::new(SectionType::DataSources, footer));
    }
    ensure_answer(&mut sections, content);
    sections
}
