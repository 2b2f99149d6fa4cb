/*!
 * Structured explanation documents.
 *
 * An explanation is produced upstream as JSON, one entry per level. This
 * module turns it into the ordered narration segments for the video and into
 * the markdown text returned next to it.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::PipelineResult;
use crate::pipeline::LevelRequest;

/// Key concepts and pitfalls narrated per slide
const MAX_LIST_ITEMS: usize = 6;

/// One quiz question with its answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuizItem {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub a: String,
}

// @struct: Explanation content for one level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    #[serde(default)]
    pub overview: String,

    #[serde(default)]
    pub key_concepts: Vec<String>,

    #[serde(default)]
    pub walkthrough: String,

    #[serde(default)]
    pub complexity: String,

    #[serde(default)]
    pub pitfalls: Vec<String>,

    #[serde(default)]
    pub quiz: Vec<QuizItem>,

    #[serde(default)]
    pub tl_dr: String,

    // @field: Further reading links, rendered in markdown only
    #[serde(default)]
    pub references: Vec<String>,
}

/// An explanation tagged with its level name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelExplanation {
    pub level: String,
    #[serde(flatten)]
    pub explanation: Explanation,
}

/// Read a JSON array of level explanations
pub fn load_explanations<P: AsRef<Path>>(path: P) -> Result<Vec<LevelExplanation>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read explanations: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse explanations: {}", path.display()))
}

/// Cap `text` at `max_chars`, cutting at a word boundary and appending `...`
pub fn shorten(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let kept = match cut.rfind(char::is_whitespace) {
        Some(space) if space > cut.len() / 2 => &cut[..space],
        _ => cut.as_str(),
    };
    format!("{}...", kept.trim_end())
}

/// Upper-case the first character
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn join_items(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(MAX_LIST_ITEMS)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Explanation {
    /// Narrated (title, body) sections in slide order; empty sections are skipped
    pub fn sections(&self, max_chars: usize) -> Vec<(String, String)> {
        let candidates = [
            ("Overview", self.overview.clone()),
            ("Key Concepts", join_items(&self.key_concepts)),
            ("Walkthrough", self.walkthrough.clone()),
            ("Complexity", self.complexity.clone()),
            ("Pitfalls", join_items(&self.pitfalls)),
            ("TL;DR", self.tl_dr.clone()),
        ];
        candidates
            .into_iter()
            .filter(|(_, body)| !body.trim().is_empty())
            .map(|(title, body)| (title.to_string(), shorten(&body, max_chars)))
            .collect()
    }

    /// Segments for the video pipeline
    pub fn to_request(&self, level: &str, max_chars: usize) -> LevelRequest {
        LevelRequest::from_sections(level, self.sections(max_chars))
    }

    /// Full markdown text for the level
    pub fn to_markdown(&self, level: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(format!("# Explanation: {}\n", capitalize(level)));
        parts.push(format!("**TL;DR**: {}\n", self.tl_dr.trim()));
        parts.push(format!("## Overview\n{}\n", self.overview.trim()));

        if !self.key_concepts.is_empty() {
            parts.push("## Key Concepts".to_string());
            parts.extend(self.key_concepts.iter().map(|c| format!("- {}", c)));
            parts.push(String::new());
        }
        if !self.walkthrough.trim().is_empty() {
            parts.push(format!("## Step-by-step Walkthrough\n{}\n", self.walkthrough.trim()));
        }
        if !self.complexity.trim().is_empty() {
            parts.push(format!("## Complexity / Performance\n{}\n", self.complexity.trim()));
        }
        if !self.pitfalls.is_empty() {
            parts.push("## Pitfalls & Edge Cases".to_string());
            parts.extend(self.pitfalls.iter().map(|p| format!("- {}", p)));
            parts.push(String::new());
        }
        if !self.quiz.is_empty() {
            parts.push("## Quick Quiz (self-check)".to_string());
            for (i, item) in self.quiz.iter().enumerate() {
                parts.push(format!("**Q{}.** {}\n\n*Answer.* {}\n", i + 1, item.q, item.a));
            }
        }
        if !self.references.is_empty() {
            parts.push("## References / Further Reading".to_string());
            parts.extend(self.references.iter().map(|u| format!("- {}", u)));
        }

        parts.join("\n").trim().to_string()
    }
}

/// Markdown for a level followed by the pipeline's remark, if any
pub fn render_with_outcome(explanation: &Explanation, result: &PipelineResult) -> String {
    let mut markdown = explanation.to_markdown(result.level());
    if let Some(note) = result.note() {
        markdown.push_str("\n\n");
        markdown.push_str(&note);
    }
    markdown
}
