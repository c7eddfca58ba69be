//! Execution trace of a single run.

use std::fmt::Write as _;

use serde::Serialize;
use uuid::Uuid;

use super::events::EventKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
}

/// One step invocation.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: &'static str,
    pub triggers: Vec<EventKind>,
    pub emitted: Option<EventKind>,
    /// Offset from run start.
    pub started_ms: u64,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
}

/// Invocations in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTrace {
    pub run_id: Uuid,
    pub document: String,
    pub records: Vec<StepRecord>,
}

impl ExecutionTrace {
    pub fn new(run_id: Uuid, document: impl Into<String>) -> Self {
        Self {
            run_id,
            document: document.into(),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    /// Names of completed steps, in completion order.
    pub fn steps(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.step).collect()
    }

    pub fn find(&self, step: &str) -> Option<&StepRecord> {
        self.records.iter().find(|r| r.step == step)
    }

    /// Mermaid flowchart of this execution; edges are numbered in start order.
    pub fn render_mermaid(&self) -> String {
        let mut ordered: Vec<&StepRecord> = self.records.iter().collect();
        ordered.sort_by_key(|r| r.started_ms);

        let mut out = String::from("flowchart LR\n");
        let _ = writeln!(out, "    %% run {} ({})", self.run_id, self.document);
        for (n, record) in ordered.iter().enumerate() {
            let n = n + 1;
            let node = match &record.outcome {
                StepOutcome::Succeeded => format!("st_{0}[{0} {1}ms]", record.step, record.duration_ms),
                StepOutcome::Failed(_) => format!("st_{0}{{{{{0} failed}}}}", record.step),
            };
            for kind in &record.triggers {
                let _ = writeln!(out, "    ev_{kind}([{kind}]) -->|#{n}| {node}");
            }
            if let Some(kind) = record.emitted {
                let _ = writeln!(out, "    st_{} --> ev_{kind}([{kind}])", record.step);
            }
        }
        out
    }
}
