//! Run reports: the end-of-run summary and the input for `recrawl`.

use super::json::write_json_atomic;
use crate::errors::PersistenceError;
use crate::models::{Period, RunReport};
use rand::{Rng, rng};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Write `report` under `<output_dir>/_runs/`.
///
/// # Arguments
///
/// * `output_dir` - The crawl's output root
/// * `report` - Summary of the finished run
///
/// # Returns
///
/// The path written, `run-<finished_at>-<nonce>.json`. The random suffix keeps
/// runs finishing within the same second from replacing each other's report.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_report(
    output_dir: &Path,
    report: &RunReport,
) -> Result<PathBuf, PersistenceError> {
    let stamp: String = report
        .finished_at
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let nonce: u32 = rng().random();
    let path = output_dir
        .join("_runs")
        .join(format!("run-{stamp}-{nonce:08x}.json"));
    write_json_atomic(&path, report, "run_report").await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}

/// Load a report written by [`write_report`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a run report.
pub async fn read_report(path: &Path) -> Result<RunReport, Box<dyn Error>> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Failed URLs worth another attempt, grouped by period in ascending order.
/// Duplicates are dropped; order within a period follows the report.
pub fn recrawl_batches(report: &RunReport) -> Vec<(Period, Vec<String>)> {
    let mut batches: BTreeMap<Period, Vec<String>> = BTreeMap::new();
    for failure in report.failures.iter().filter(|f| f.kind.is_retryable()) {
        let urls = batches.entry(failure.period).or_default();
        if !urls.contains(&failure.url) {
            urls.push(failure.url.clone());
        }
    }
    batches.into_iter().collect()
}
