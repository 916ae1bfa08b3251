//! Score extraction from model responses.

use std::sync::LazyLock;

use regex::Regex;

/// `score`, up to ten non-digits (newlines included), then one digit.
static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)score[^0-9]{0,10}(\d)").expect("score pattern is valid"));

/// Lowest and highest valid score.
pub const SCORE_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Pull the first `score ... n` marker out of a response.
///
/// Digits outside `1..=5` count as no score.
pub fn extract_score(text: &str) -> Option<u8> {
    let caps = SCORE_RE.captures(text)?;
    let digit = caps.get(1)?.as_str().parse::<u8>().ok()?;
    SCORE_RANGE.contains(&digit).then_some(digit)
}
