//! Prompt templates for the three grading stages.

use leadscore_shared::{Identifier, Record, TargetConfig};

const SEARCH_INSTRUCTION: &str = "\
Find online profiles that probably belong to the same person/company/entity and
could affect our judgment of income or real-estate interest.

Return a **JSON list** where each object has:
  site          - domain / platform (linkedin, github, ...)
  url           - full link
  probability   - 0-1 likelihood it's the same entity
  implication   - one short sentence (e.g. \"C-level exec -> high income\")

Only return valid JSON. Nothing else.";

/// Prompts rendered for one target audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    grade_system: String,
    rescore_system: String,
}

impl Prompts {
    pub fn new(target: &TargetConfig) -> Self {
        let description = target.description.trim();
        let examples = target.examples.trim();

        let grade_system = format!(
            "You are a lead-qualification expert.\n\n\
             Give an **integer score 1-5** assessing whether an Instagram account fits\n\
             the following target audience:\n\n\
             {description}\n\n\
             Examples:\n\
             {examples}\n\n\
             FORMAT -> exactly:\n\n\
             [your concise argumentation]\n\
             ##Score n"
        );

        let rescore_system = format!(
            "Give the improved integer score 1-5 (same scale as before)\n\
             after considering both the Instagram argumentation and the enrichment JSON.\n\
             Prefer higher scores when the enrichment increases confidence that the\n\
             profile matches:\n\n\
             {description}\n\n\
             FORMAT -> exactly:\n\n\
             [one or two sentences]\n\
             ##Score n"
        );

        Self {
            grade_system,
            rescore_system,
        }
    }

    /// Stage-1 system prompt.
    pub fn grade_system(&self) -> &str {
        &self.grade_system
    }

    /// Stage-1 user prompt. Captions are cut to `caption_chars` characters.
    pub fn grade_user(&self, record: &Record, caption_chars: usize) -> String {
        let captions = record.caption_text();
        format!(
            "Instagram profile\n\
             -----------------\n\
             username      : {}\n\
             full name     : {}\n\
             location      : {}\n\
             biography     : {}\n\
             external urls : {}\n\n\
             Latest captions\n\
             ---------------\n\
             {}",
            record.identifier,
            record.full_name,
            record.location,
            record.biography,
            record.external_urls.join(", "),
            truncate_chars(&captions, caption_chars),
        )
    }

    /// Stage-2 web-search prompt.
    pub fn search(&self, identifier: &Identifier, reasoning: &str) -> String {
        format!("Instagram username: {identifier}\n\nIG reasoning:\n{reasoning}\n\n{SEARCH_INSTRUCTION}")
    }

    /// Stage-3 system prompt.
    pub fn rescore_system(&self) -> &str {
        &self.rescore_system
    }

    /// Stage-3 user prompt.
    pub fn rescore_user(&self, reasoning: &str, enrichment: &str) -> String {
        format!(
            "Instagram argumentation\n\
             -----------------------\n\
             {reasoning}\n\n\
             Enrichment\n\
             ----------\n\
             {enrichment}"
        )
    }
}

/// The first `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
