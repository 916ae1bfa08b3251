//! Identifier loading from a CSV file.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use leadscore_shared::{Identifier, LeadScoreError, Result};
use tracing::{debug, info};

/// Read identifiers from `column` of the CSV at `path`.
///
/// Values are normalized and deduplicated (first occurrence wins), then
/// capped at `max` when given. Zero usable identifiers is an error.
pub fn load_identifiers(path: &Path, column: &str, max: Option<usize>) -> Result<Vec<Identifier>> {
    let file = std::fs::File::open(path).map_err(|e| LeadScoreError::io(path, e))?;
    let identifiers = read_identifiers(file, column, max)?;
    info!(path = %path.display(), count = identifiers.len(), "identifiers loaded");
    Ok(identifiers)
}

/// Like [`load_identifiers`], over any reader.
pub fn read_identifiers<R: Read>(reader: R, column: &str, max: Option<usize>) -> Result<Vec<Identifier>> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = csv
        .headers()
        .map_err(|e| LeadScoreError::validation(format!("unreadable CSV header: {e}")))?;
    let index = headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
        .ok_or_else(|| {
            LeadScoreError::validation(format!(
                "input has no '{column}' column (found: {})",
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;

    let mut seen = HashSet::new();
    let mut identifiers = Vec::new();
    let mut rows = 0usize;

    for row in csv.records() {
        let row = row.map_err(|e| LeadScoreError::parse(format!("bad CSV row: {e}")))?;
        rows += 1;
        let Some(identifier) = row.get(index).and_then(Identifier::parse) else {
            continue;
        };
        if seen.insert(identifier.clone()) {
            identifiers.push(identifier);
        }
    }

    debug!(rows, unique = identifiers.len(), "identifier column read");

    if identifiers.is_empty() {
        return Err(LeadScoreError::validation(format!(
            "no usable '{column}' entries in input"
        )));
    }

    if let Some(max) = max {
        identifiers.truncate(max);
    }
    Ok(identifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(data: &str, max: Option<usize>) -> Result<Vec<String>> {
        read_identifiers(data.as_bytes(), "channelName", max)
            .map(|ids| ids.into_iter().map(|i| i.to_string()).collect())
    }

    #[test]
    fn normalizes_and_dedups_in_order() {
        let data = "channelName,followers\n@graz.invest,10\n styria_hiker ,5\ngraz.invest,10\n,0\n@,1\nwien.home,2\n";
        assert_eq!(
            read(data, None).unwrap(),
            vec!["graz.invest", "styria_hiker", "wien.home"]
        );
    }

    #[test]
    fn max_applies_after_dedup() {
        let data = "channelName\na\na\nb\nc\n";
        assert_eq!(read(data, Some(2)).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn missing_column_is_a_validation_error() {
        let err = read("username\nfoo\n", None).unwrap_err();
        assert!(matches!(err, LeadScoreError::Validation { .. }));
        assert!(err.to_string().contains("channelName"));
    }

    #[test]
    fn no_usable_identifiers_is_a_validation_error() {
        let err = read("channelName\n\n@\n  \n", None).unwrap_err();
        assert!(matches!(err, LeadScoreError::Validation { .. }));
    }

    #[test]
    fn header_whitespace_and_bom_are_ignored() {
        let data = "\u{feff} channelName ,x\njdoe,1\n";
        assert_eq!(read(data, None).unwrap(), vec!["jdoe"]);
    }

    #[test]
    fn custom_column() {
        let ids = read_identifiers("handle\n@x\n".as_bytes(), "handle", None).unwrap();
        assert_eq!(ids[0].as_str(), "x");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_identifiers(Path::new("/definitely/not/here.csv"), "channelName", None)
            .unwrap_err();
        assert!(matches!(err, LeadScoreError::Io { .. }));
    }
}
