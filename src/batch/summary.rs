//! Markdown summary of a batch.

use std::fmt::Write as _;

use super::{BatchEntry, BatchReport, FileOutcome};

/// One row per document: file, status, similarity, first report line (or error).
pub fn build_summary(entries: &[BatchEntry]) -> String {
    let mut out = String::from("| File | Status | Similarity | Report |\n|---|---|---|---|\n");
    for entry in entries {
        let (status, similarity, detail) = match &entry.outcome {
            FileOutcome::Completed(result) => (
                "OK",
                format!("{:.2}", result.similarity),
                result.report.lines().next().unwrap_or_default().to_string(),
            ),
            FileOutcome::Failed { error } => ("FAILED", "-".to_string(), error.clone()),
            FileOutcome::TimedOut { error } => ("TIMED OUT", "-".to_string(), error.clone()),
        };
        let _ = writeln!(
            out,
            "| {} | {status} | {similarity} | {} |",
            cell(&entry.file_name),
            cell(&detail)
        );
    }
    out
}

/// Summary table plus a totals line.
pub fn build_report_summary(report: &BatchReport) -> String {
    format!(
        "Processed {} file(s) in {:.2} seconds ({} ok, {} failed).\n\n{}",
        report.entries.len(),
        report.duration_ms as f64 / 1000.0,
        report.succeeded(),
        report.failed(),
        build_summary(&report.entries)
    )
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}
