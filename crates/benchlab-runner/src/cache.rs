//! Result cache for resumable campaigns.
//!
//! When a campaign resumes, the rows already present in its result file form
//! the execution set. Each upcoming run is compared against that set on its
//! parameter columns only; a match means the run already happened and is
//! skipped. Comparison is string-based on the rendered cell values, so a
//! cell written by one process compares equal when read back by another.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use benchlab_core::{CampaignError, Record, Result};

use crate::sink::CSV_SEPARATOR;

/// One row read back from a result file, keyed by header column.
pub type CachedRow = BTreeMap<String, String>;

/// Read the execution set from an existing result file.
///
/// Returns the cached rows plus whether the metadata comment header still
/// needs to be written (true when the file is absent or holds no data rows
/// yet). Comment and blank lines are skipped; the first remaining line is
/// the column header.
pub fn load_execution_set(path: &Path) -> Result<(Vec<CachedRow>, bool)> {
    if !path.exists() {
        return Ok((Vec::new(), true));
    }

    let content = fs::read_to_string(path).map_err(|e| CampaignError::ResultFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let header: Vec<String> = match lines.next() {
        Some(line) => line.split(CSV_SEPARATOR).map(str::to_string).collect(),
        None => return Ok((Vec::new(), true)),
    };

    let rows = lines
        .map(|line| {
            header
                .iter()
                .cloned()
                .zip(line.split(CSV_SEPARATOR).map(str::to_string))
                .collect()
        })
        .collect();

    Ok((rows, false))
}

/// Reduce cached rows to parameter columns before matching: the variables of
/// the current record, the campaign constants, and the `experiment_name` and
/// `rep` bookkeeping columns. Metric and derived pretty columns disappear, so
/// a candidate matches on exactly the key subset both sides share.
pub fn retain_parameter_keys(rows: &mut [CachedRow], record: &Record, constants: &Record) {
    for row in rows.iter_mut() {
        row.retain(|key, _| {
            record.contains_key(key)
                || constants.contains_key(key)
                || key == "experiment_name"
                || key == "rep"
        });
    }
}

/// Whether a candidate run is already present in the execution set. Only
/// candidate keys that exist in a cached row participate in the comparison.
pub fn is_cached(candidate: &CachedRow, rows: &[CachedRow]) -> bool {
    rows.iter().any(|row| {
        candidate.iter().all(|(key, value)| match row.get(key) {
            Some(cached) => cached == value,
            None => true,
        })
    })
}

/// Resolve the result file a resuming campaign should append to.
///
/// The dated suffix (the last two `_`-separated segments of the fresh path)
/// is stripped, and the newest existing `.csv` sharing the remaining prefix
/// wins. `None` when no previous file exists, in which case the fresh dated
/// path is used as-is.
pub fn locate_latest_result_file(dated_path: &Path) -> Result<Option<PathBuf>> {
    let full = dated_path.to_string_lossy();
    let parts: Vec<&str> = full.split('_').collect();
    if parts.len() <= 2 {
        return Ok(None);
    }
    let prefix = parts[..parts.len() - 2].join("_");
    let prefix_path = PathBuf::from(&prefix);

    let dir = match prefix_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name_prefix = match prefix_path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return Ok(None),
    };
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with(&name_prefix) && file_name.ends_with(".csv") {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_file_yields_empty_set_and_header_request() {
        let dir = tempfile::tempdir().unwrap();
        let (rows, print_header) = load_execution_set(&dir.path().join("absent.csv")).unwrap();
        assert!(rows.is_empty());
        assert!(print_header);
    }

    #[test]
    fn comments_are_skipped_and_rows_keyed_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        write(
            &path,
            "# benchmark_campaign_name: demo\na;b;metric\n1;x;9.5\n2;y;3.0\n",
        );
        let (rows, print_header) = load_execution_set(&path).unwrap();
        assert!(!print_header);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["a"], "1");
        assert_eq!(rows[1]["metric"], "3.0");
    }

    #[test]
    fn comments_only_file_still_requests_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        write(&path, "# benchmark_campaign_name: demo\n");
        let (rows, print_header) = load_execution_set(&path).unwrap();
        assert!(rows.is_empty());
        assert!(print_header);
    }

    #[test]
    fn matching_ignores_metric_columns() {
        let mut rows = vec![CachedRow::from([
            ("a".to_string(), "1".to_string()),
            ("rep".to_string(), "1".to_string()),
            ("metric".to_string(), "9.5".to_string()),
            ("a_pretty".to_string(), "\"one\"".to_string()),
        ])];

        let mut record = Record::new();
        record.insert("a".into(), json!(1));
        retain_parameter_keys(&mut rows, &record, &Record::new());
        assert!(!rows[0].contains_key("metric"));
        assert!(!rows[0].contains_key("a_pretty"));

        // Candidate keys absent from the cached row do not participate.
        let candidate = CachedRow::from([
            ("a".to_string(), "1".to_string()),
            ("rep".to_string(), "1".to_string()),
            ("a_pretty".to_string(), "\"one\"".to_string()),
        ]);
        assert!(is_cached(&candidate, &rows));

        let other_rep = CachedRow::from([
            ("a".to_string(), "1".to_string()),
            ("rep".to_string(), "2".to_string()),
        ]);
        assert!(!is_cached(&other_rep, &rows));
    }

    #[test]
    fn latest_file_with_same_prefix_is_relocated() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("benchmark_box_demo_20240101_100000.csv"), "");
        write(&dir.path().join("benchmark_box_demo_20240301_100000.csv"), "");
        write(&dir.path().join("benchmark_box_other_20240401_100000.csv"), "");

        let fresh = dir.path().join("benchmark_box_demo_20240501_120000.csv");
        let found = locate_latest_result_file(&fresh).unwrap().unwrap();
        assert_eq!(
            found.file_name().unwrap().to_str().unwrap(),
            "benchmark_box_demo_20240301_100000.csv"
        );
    }

    #[test]
    fn no_previous_file_keeps_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("benchmark_box_demo_20240501_120000.csv");
        assert!(locate_latest_result_file(&fresh).unwrap().is_none());
    }
}
