//! Append-only CSV storage for summary records.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use csv::{ReaderBuilder, WriterBuilder};

use crate::report::SummaryRecord;

const RESULTS_MARKER: &str = "benchmark_results_";

pub fn results_file_name(provider: &str, timestamp: &str) -> String {
    format!("{}_{}{}.csv", provider, RESULTS_MARKER, timestamp)
}

/// `{dir}/{provider}_benchmark_results_{now}.csv` with `now` rendered by `timestamp_format`.
pub fn results_path(dir: &Path, provider: &str, timestamp_format: &str) -> Result<PathBuf> {
    let items: Vec<Item<'_>> = StrftimeItems::new(timestamp_format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(anyhow!("invalid timestamp format: {}", timestamp_format));
    }
    let timestamp = Local::now()
        .format_with_items(items.into_iter())
        .to_string();
    Ok(dir.join(results_file_name(provider, &timestamp)))
}

/// Appends `records`, writing the header row only if the file is missing or empty.
pub fn append_records(path: &Path, records: &[SummaryRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create results directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    // An empty file counts as new, whoever created it.
    let is_empty = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len()
        == 0;
    let mut writer = WriterBuilder::new().has_headers(is_empty).from_writer(file);
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write record to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<SummaryRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    reader
        .deserialize::<SummaryRecord>()
        .enumerate()
        .map(|(idx, row)| {
            row.with_context(|| format!("{} row {} is malformed", path.display(), idx + 1))
        })
        .collect()
}

/// Every results CSV directly inside `dir`, sorted by name.
pub fn find_result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let is_result = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.contains(RESULTS_MARKER) && name.ends_with(".csv"))
            .unwrap_or(false);
        if is_result && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Most recently modified results file in `dir`.
pub fn latest_result_file(dir: &Path) -> Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for path in find_result_files(dir)? {
        let modified = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if newest.as_ref().map_or(true, |(time, _)| modified >= *time) {
            newest = Some((modified, path));
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| anyhow!("no benchmark results found in {}", dir.display()))
}

/// Provider name encoded in a results file name, e.g. `ollama` for
/// `ollama_benchmark_results_20250723_143022.csv`.
pub fn provider_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    match stem.find(RESULTS_MARKER) {
        Some(0) | None => stem.to_string(),
        Some(idx) => stem[..idx].trim_end_matches('_').to_string(),
    }
}

/// Human label for a run: provider plus timestamp.
pub fn run_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    stem.replace(&format!("_{}", RESULTS_MARKER), " ")
        .replace('_', " ")
}
