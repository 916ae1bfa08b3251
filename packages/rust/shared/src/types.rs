//! Core domain types for a scoring run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// A normalized profile handle: trimmed, without leading `@`, never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize a raw handle. Returns `None` when nothing usable remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().trim_start_matches('@').trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(Self(cleaned.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A provider-sized group of identifiers fetched in one scraper job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of this batch within the run.
    pub index: usize,
    /// Identifiers in input order.
    pub identifiers: Vec<Identifier>,
}

impl Batch {
    /// Split `identifiers` into consecutive batches of at most `chunk_size`.
    ///
    /// A `chunk_size` of zero is treated as one.
    pub fn chunk(identifiers: &[Identifier], chunk_size: usize) -> Vec<Batch> {
        identifiers
            .chunks(chunk_size.max(1))
            .enumerate()
            .map(|(index, ids)| Batch {
                index,
                identifiers: ids.to_vec(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// The first few identifiers, for log messages.
    pub fn preview(&self) -> String {
        let head: Vec<&str> = self.identifiers.iter().take(3).map(Identifier::as_str).collect();
        if self.identifiers.len() > 3 {
            format!("{}, ...", head.join(", "))
        } else {
            head.join(", ")
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Public profile data fetched for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: Identifier,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub biography: String,
    #[serde(default)]
    pub location: String,
    /// Captions of the latest posts, newest first as returned by the provider.
    #[serde(default)]
    pub captions: Vec<String>,
    #[serde(default)]
    pub external_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl Record {
    /// Whether the record carries any text worth grading.
    pub fn has_free_text(&self) -> bool {
        !self.biography.trim().is_empty()
            || !self.location.trim().is_empty()
            || self.captions.iter().any(|c| !c.trim().is_empty())
    }

    /// Captions joined by newlines.
    pub fn caption_text(&self) -> String {
        self.captions.join("\n")
    }
}

// ---------------------------------------------------------------------------
// GradingResult
// ---------------------------------------------------------------------------

/// A profile the web-search answer believes belongs to the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileHint {
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub url: String,
    /// Likelihood in `0..=1` that the profile is the same entity.
    #[serde(default, deserialize_with = "lenient_probability")]
    pub probability: Option<f64>,
    #[serde(default)]
    pub implication: String,
}

/// Accept `0.8`, `80`, `"0.8"` or `"80%"`. Anything else becomes `None`.
fn lenient_probability<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let raw = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|p| p / 100.0),
                None => s.parse::<f64>().ok(),
            }
        }
        _ => None,
    };
    Ok(raw.map(|p| if p > 1.0 { p / 100.0 } else { p }).map(|p| p.clamp(0.0, 1.0)))
}

/// Outcome of grading one record. Built once by the scorer, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingResult {
    pub identifier: Identifier,
    /// Final score in `1..=5`, or `None` when no stage produced one.
    pub score: Option<u8>,
    /// Stage-1 argumentation, or the failure text when stage 1 failed.
    pub reasoning: String,
    /// Stage-2 web-search answer. Empty when enrichment did not run or failed.
    pub enrichment: String,
    /// Profiles listed in the enrichment answer when it parsed as JSON.
    #[serde(default)]
    pub linked_profiles: Vec<ProfileHint>,
    /// Stage-3 response text. Empty when re-grading did not run or failed.
    pub rescore_reasoning: String,
    pub graded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regraded_at: Option<DateTime<Utc>>,
    /// Copied from the record for the output file.
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,
}

impl GradingResult {
    /// Whether this result reaches `min_score`. Absent scores never do.
    pub fn meets(&self, min_score: u8) -> bool {
        self.score.is_some_and(|s| s >= min_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<Identifier> {
        raw.iter().filter_map(|r| Identifier::parse(r)).collect()
    }

    #[test]
    fn identifier_normalization() {
        assert_eq!(Identifier::parse("  @graz.invest ").unwrap().as_str(), "graz.invest");
        assert_eq!(Identifier::parse("@@styria").unwrap().as_str(), "styria");
        assert!(Identifier::parse("   ").is_none());
        assert!(Identifier::parse("@").is_none());
    }

    #[test]
    fn chunking_covers_input_in_order() {
        let all: Vec<String> = (0..23).map(|i| format!("user{i}")).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let input = ids(&refs);

        let batches = Batch::chunk(&input, 5);
        assert_eq!(batches.len(), 5); // ceil(23 / 5)
        assert!(batches.iter().all(|b| b.len() <= 5));
        assert_eq!(batches.last().unwrap().len(), 3);

        let rejoined: Vec<Identifier> =
            batches.iter().flat_map(|b| b.identifiers.clone()).collect();
        assert_eq!(rejoined, input);
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn chunking_edge_sizes() {
        let input = ids(&["a", "b", "c"]);
        assert!(Batch::chunk(&[], 100).is_empty());
        assert_eq!(Batch::chunk(&input, 100).len(), 1);
        assert_eq!(Batch::chunk(&input, 3).len(), 1);
        assert_eq!(Batch::chunk(&input, 0).len(), 3);
    }

    #[test]
    fn batch_preview_is_short() {
        let batch = Batch {
            index: 0,
            identifiers: ids(&["a", "b", "c", "d"]),
        };
        assert_eq!(batch.preview(), "a, b, c, ...");
    }

    #[test]
    fn record_free_text_detection() {
        let mut record = Record {
            identifier: Identifier::parse("someone").unwrap(),
            full_name: "Some One".into(),
            biography: " ".into(),
            location: String::new(),
            captions: vec![String::new()],
            external_urls: vec![],
            followers_count: None,
            is_private: None,
        };
        assert!(!record.has_free_text());

        record.captions.push("New flat in Graz!".into());
        assert!(record.has_free_text());
    }

    #[test]
    fn hint_probability_is_lenient() {
        let hints: Vec<ProfileHint> = serde_json::from_str(
            r#"[
                {"site": "a", "probability": 0.25},
                {"site": "b", "probability": "80%"},
                {"site": "c", "probability": 60},
                {"site": "d", "probability": "likely"},
                {"site": "e"}
            ]"#,
        )
        .unwrap();
        let probs: Vec<Option<f64>> = hints.iter().map(|h| h.probability).collect();
        assert_eq!(probs, vec![Some(0.25), Some(0.8), Some(0.6), None, None]);
    }

    #[test]
    fn grading_result_threshold() {
        let mut result = GradingResult {
            identifier: Identifier::parse("x").unwrap(),
            score: None,
            reasoning: String::new(),
            enrichment: String::new(),
            linked_profiles: vec![],
            rescore_reasoning: String::new(),
            graded_at: Utc::now(),
            enriched_at: None,
            regraded_at: None,
            full_name: String::new(),
            followers_count: None,
        };
        assert!(!result.meets(1));
        result.score = Some(3);
        assert!(result.meets(3));
        assert!(!result.meets(4));
    }
}
