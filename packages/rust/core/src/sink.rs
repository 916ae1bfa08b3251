//! Score filtering and CSV output.

use std::fs;
use std::path::{Path, PathBuf};

use leadscore_shared::{GradingResult, LeadScoreError, Result};
use tracing::{debug, info};
use uuid::Uuid;

/// Output columns, in order.
pub const COLUMNS: [&str; 9] = [
    "username",
    "score",
    "reasoning",
    "enrichment",
    "rescore_reasoning",
    "linked_profiles",
    "full_name",
    "followers_count",
    "graded_at",
];

/// Keep results whose score is present and at least `min_score`.
pub fn filter_results(results: Vec<GradingResult>, min_score: u8) -> Vec<GradingResult> {
    results.into_iter().filter(|r| r.meets(min_score)).collect()
}

/// Write `results` as CSV to `destination`, replacing it atomically.
///
/// Rows go to a temporary file in the same directory, which is renamed over
/// the destination once fully written. On failure the destination is left
/// untouched.
pub fn write_csv(destination: &Path, results: &[GradingResult]) -> Result<()> {
    let tmp = temp_path(destination);
    if let Err(e) = write_rows(&tmp, results) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    fs::rename(&tmp, destination).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        LeadScoreError::io(destination, e)
    })?;

    info!(path = %destination.display(), rows = results.len(), "results written");
    Ok(())
}

/// Filter, then write when a destination is given. Returns the kept results.
pub fn filter_and_write(
    results: Vec<GradingResult>,
    min_score: u8,
    destination: Option<&Path>,
) -> Result<Vec<GradingResult>> {
    let total = results.len();
    let kept = filter_results(results, min_score);
    debug!(total, kept = kept.len(), min_score, "results filtered");

    if let Some(path) = destination {
        write_csv(path, &kept)?;
    }
    Ok(kept)
}

fn temp_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results.csv".into());
    destination.with_file_name(format!(".{name}.{}.tmp", Uuid::now_v7()))
}

fn write_rows(path: &Path, results: &[GradingResult]) -> Result<()> {
    let csv_err = |e: csv::Error| LeadScoreError::Storage(format!("CSV write failed: {e}"));

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(COLUMNS).map_err(csv_err)?;

    for result in results {
        let linked = if result.linked_profiles.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&result.linked_profiles)
                .map_err(|e| LeadScoreError::parse(format!("linked profiles: {e}")))?
        };

        writer
            .write_record([
                result.identifier.as_str(),
                &result.score.map(|s| s.to_string()).unwrap_or_default(),
                &result.reasoning,
                &result.enrichment,
                &result.rescore_reasoning,
                &linked,
                &result.full_name,
                &result
                    .followers_count
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
                &result.graded_at.to_rfc3339(),
            ])
            .map_err(csv_err)?;
    }

    writer
        .flush()
        .map_err(|e| LeadScoreError::io(path, e))?;
    Ok(())
}

/// Plain-text table of the best `limit` results, highest score first.
pub fn summary_table(results: &[GradingResult], limit: usize) -> String {
    let mut rows: Vec<&GradingResult> = results.iter().collect();
    rows.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.identifier.cmp(&b.identifier)));

    let mut out = format!("{:<30} {:>5}  {}\n", "USERNAME", "SCORE", "REASONING");
    for result in rows.iter().take(limit) {
        let first_line = result.reasoning.lines().next().unwrap_or("").trim();
        let reasoning: String = first_line.chars().take(70).collect();
        out.push_str(&format!(
            "{:<30} {:>5}  {}\n",
            result.identifier.as_str(),
            result.score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            reasoning
        ));
    }
    if rows.len() > limit {
        out.push_str(&format!("... and {} more\n", rows.len() - limit));
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leadscore_shared::{Identifier, ProfileHint};

    use super::*;

    fn result(name: &str, score: Option<u8>) -> GradingResult {
        GradingResult {
            identifier: Identifier::parse(name).unwrap(),
            score,
            reasoning: format!("Reasoning for {name},\nwith \"quotes\"\n##Score {score:?}"),
            enrichment: String::new(),
            linked_profiles: vec![],
            rescore_reasoning: String::new(),
            graded_at: Utc::now(),
            enriched_at: None,
            regraded_at: None,
            full_name: format!("Name {name}"),
            followers_count: Some(100),
        }
    }

    fn temp_csv() -> PathBuf {
        std::env::temp_dir().join(format!("leadscore_sink_{}.csv", Uuid::now_v7()))
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        assert_eq!(reader.headers().unwrap(), &csv::StringRecord::from(COLUMNS.to_vec()));
        reader.records().map(|r| r.unwrap()).collect()
    }

    fn scored_set() -> Vec<GradingResult> {
        vec![
            result("none", None),
            result("one", Some(1)),
            result("two", Some(2)),
            result("three", Some(3)),
            result("four", Some(4)),
            result("five", Some(5)),
        ]
    }

    #[test]
    fn filter_boundary_is_inclusive() {
        let kept = filter_results(scored_set(), 3);
        let mut scores: Vec<u8> = kept.iter().filter_map(|r| r.score).collect();
        scores.sort();
        assert_eq!(scores, vec![3, 4, 5]);
    }

    #[test]
    fn absent_scores_never_pass() {
        let kept = filter_results(scored_set(), 1);
        assert_eq!(kept.len(), 5);
        assert!(kept.iter().all(|r| r.score.is_some()));
    }

    #[test]
    fn writes_exactly_the_kept_rows() {
        let path = temp_csv();
        let kept = filter_and_write(scored_set(), 3, Some(&path)).unwrap();
        assert_eq!(kept.len(), 3);

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        let mut names: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
        names.sort();
        assert_eq!(names, vec!["five", "four", "three"]);

        let three = rows.iter().find(|r| &r[0] == "three").unwrap();
        assert_eq!(&three[1], "3");
        assert!(three[2].contains("with \"quotes\""));
        assert_eq!(&three[6], "Name three");
        assert_eq!(&three[7], "100");
        fs::remove_file(path).ok();
    }

    #[test]
    fn linked_profiles_are_json() {
        let mut with_hints = result("linked", Some(4));
        with_hints.linked_profiles = vec![ProfileHint {
            site: "linkedin".into(),
            url: "https://linkedin.com/in/x".into(),
            probability: Some(0.9),
            implication: "CEO".into(),
        }];

        let path = temp_csv();
        write_csv(&path, &[with_hints]).unwrap();
        let rows = read_rows(&path);
        let hints: Vec<ProfileHint> = serde_json::from_str(&rows[0][5]).unwrap();
        assert_eq!(hints[0].site, "linkedin");
        fs::remove_file(path).ok();
    }

    #[test]
    fn replaces_existing_file_and_leaves_no_temp() {
        let dir = std::env::temp_dir().join(format!("leadscore_sink_dir_{}", Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.csv");
        fs::write(&path, "stale content").unwrap();

        write_csv(&path, &[result("fresh", Some(5))]).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn failed_write_keeps_destination() {
        let path = std::env::temp_dir()
            .join(format!("leadscore_missing_{}", Uuid::now_v7()))
            .join("out.csv");
        let err = write_csv(&path, &[result("x", Some(5))]).unwrap_err();
        assert!(matches!(err, LeadScoreError::Storage(_)));
        assert!(!path.exists());
    }

    #[test]
    fn summary_lists_best_first() {
        let table = summary_table(&filter_results(scored_set(), 1), 2);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("USERNAME"));
        assert!(lines[1].starts_with("five"));
        assert!(lines[2].starts_with("four"));
        assert_eq!(lines[3], "... and 3 more");
    }
}
