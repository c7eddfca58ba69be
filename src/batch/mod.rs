//! Folder batch: every document in the input folder, one run at a time.
//!
//! Runs are serialized through the [`AdmissionGate`]. A failed document is
//! recorded and the batch moves on.

pub mod housekeeping;
pub mod summary;

pub use housekeeping::clean_output_dir;
pub use summary::{build_report_summary, build_summary};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::admission::AdmissionGate;
use crate::workflow::{RunResult, Workflow};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Input folder does not exist: {0}")]
    InputMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Completed(RunResult),
    Failed { error: String },
    TimedOut { error: String },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

/// Progress notifications for a caller-facing display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchProgress {
    Started { file_count: usize },
    Progress { completed: usize, total: usize, current_file: String },
    Completed { succeeded: usize, failed: usize, duration_ms: u64 },
}

// ═══════════════════════════════════════════════════════════
// BatchProcessor
// ═══════════════════════════════════════════════════════════

pub struct BatchProcessor {
    workflow: Arc<Workflow>,
    gate: Arc<AdmissionGate>,
    output_dir: Option<PathBuf>,
}

impl BatchProcessor {
    pub fn new(workflow: Arc<Workflow>, gate: Arc<AdmissionGate>) -> Self {
        Self {
            workflow,
            gate,
            output_dir: None,
        }
    }

    /// Clean `dir` before each batch and write one `<stem>.json` per document.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// One document through the gate.
    pub async fn process_file(&self, path: &Path, file_name: &str) -> BatchEntry {
        let start = Instant::now();
        let outcome = match self.gate.acquire(file_name).await {
            Ok(_admitted) => {
                tracing::info!(
                    document = file_name,
                    thread = ?std::thread::current().id(),
                    "Processing file"
                );
                match self.workflow.run(path, file_name).await {
                    Ok(result) => {
                        tracing::info!(
                            document = file_name,
                            similarity = result.similarity,
                            "Comparison completed"
                        );
                        FileOutcome::Completed(result)
                    }
                    Err(e) if e.is_timeout() => FileOutcome::TimedOut { error: e.to_string() },
                    Err(e) => {
                        tracing::error!(document = file_name, error = %e, "Error processing file");
                        FileOutcome::Failed { error: e.to_string() }
                    }
                }
            }
            Err(e) => FileOutcome::Failed { error: e.to_string() },
        };

        BatchEntry {
            file_name: file_name.to_string(),
            path: path.to_path_buf(),
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
        }
    }

    /// Every regular file of `input_dir`, sorted by name, sequentially.
    pub async fn process_folder(
        &self,
        input_dir: &Path,
        progress: Option<&dyn Fn(BatchProgress)>,
    ) -> Result<BatchReport, BatchError> {
        let start = Instant::now();
        let files = list_documents(input_dir)?;
        if files.is_empty() {
            tracing::info!(dir = %input_dir.display(), "No files found in input folder");
            return Ok(BatchReport::default());
        }

        if let Some(dir) = &self.output_dir {
            clean_output_dir(dir)?;
        }

        let total = files.len();
        if let Some(progress) = progress {
            progress(BatchProgress::Started { file_count: total });
        }

        let mut report = BatchReport::default();
        for (i, path) in files.iter().enumerate() {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(progress) = progress {
                progress(BatchProgress::Progress {
                    completed: i,
                    total,
                    current_file: file_name.clone(),
                });
            }

            let entry = self.process_file(path, &file_name).await;
            if let Some(dir) = &self.output_dir {
                write_entry(dir, &entry)?;
            }
            report.entries.push(entry);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            files = total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = report.duration_ms,
            "Batch finished"
        );
        if let Some(progress) = progress {
            progress(BatchProgress::Completed {
                succeeded: report.succeeded(),
                failed: report.failed(),
                duration_ms: report.duration_ms,
            });
        }
        Ok(report)
    }
}

/// Regular, non-hidden files of `dir`, sorted by file name.
pub fn list_documents(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    if !dir.is_dir() {
        return Err(BatchError::InputMissing(dir.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type()?.is_file() && !hidden {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn write_entry(dir: &Path, entry: &BatchEntry) -> Result<(), BatchError> {
    let stem = entry
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.file_name.clone());
    let json = serde_json::to_string_pretty(entry)?;
    std::fs::write(dir.join(format!("{stem}.json")), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::config::WorkflowConfig;
    use crate::workflow::Collaborators;

    fn processor() -> BatchProcessor {
        let workflow = Workflow::new(
            Collaborators::reference(),
            WorkflowConfig::default().with_timeout(Duration::from_secs(10)),
        )
        .unwrap();
        BatchProcessor::new(Arc::new(workflow), Arc::new(AdmissionGate::new()))
    }

    #[test]
    fn lists_sorted_regular_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<_> = list_documents(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn missing_input_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_documents(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, BatchError::InputMissing(_)));
    }

    #[tokio::test]
    async fn failed_file_does_not_stop_the_batch() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a_good.txt"), "INV-100 $50.00").unwrap();
        std::fs::write(input.path().join("b_broken.pdf"), "%PDF-not really").unwrap();
        std::fs::write(input.path().join("c_good.txt"), "INV-200 $75.00").unwrap();
        std::fs::write(output.path().join("stale.json"), "{}").unwrap();

        let events = Mutex::new(Vec::new());
        let record = |p: BatchProgress| events.lock().unwrap().push(p);

        let report = processor()
            .with_output_dir(output.path())
            .process_folder(input.path(), Some(&record))
            .await
            .unwrap();

        let names: Vec<_> = report.entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_good.txt", "b_broken.pdf", "c_good.txt"]);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.entries[1].outcome, FileOutcome::Failed { .. }));

        assert!(!output.path().join("stale.json").exists());
        let written = std::fs::read_to_string(output.path().join("a_good.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["similarity"], 1.0);

        let events = events.into_inner().unwrap();
        assert_eq!(events.first(), Some(&BatchProgress::Started { file_count: 3 }));
        assert!(matches!(
            events.last(),
            Some(BatchProgress::Completed { succeeded: 2, failed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn empty_folder_yields_empty_report() {
        let input = tempfile::tempdir().unwrap();
        let report = processor().process_folder(input.path(), None).await.unwrap();
        assert!(report.entries.is_empty());
    }

    #[tokio::test]
    async fn gate_is_free_after_each_file() {
        let input = tempfile::tempdir().unwrap();
        let path = input.path().join("a.txt");
        std::fs::write(&path, "INV-1").unwrap();

        let gate = Arc::new(AdmissionGate::new());
        let workflow = Workflow::new(Collaborators::reference(), WorkflowConfig::default()).unwrap();
        let processor = BatchProcessor::new(Arc::new(workflow), Arc::clone(&gate));

        let entry = processor.process_file(&path, "a.txt").await;
        assert!(entry.outcome.is_success());
        assert!(!gate.is_busy());
        assert!(gate.current_run().is_none());
    }
}
