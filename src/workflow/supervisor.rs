//! Run Supervisor: drives one run from its start event to a terminal outcome.
//!
//! All coordination for a run (routing, join bookkeeping, supervision) happens
//! on the task that awaits [`RunSupervisor::start`]. Step invocations are
//! spawned into a `JoinSet` and their results are consumed in completion order.
//! When the run ends for any reason the state store is closed and whatever is
//! still in flight is aborted.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::error::WorkflowError;
use super::events::{Event, EventKind};
use super::executor::{Invocation, StepExecutor};
use super::join::{self, JoinAccumulator, JoinOutcome};
use super::registry::{StepContext, StepRegistry};
use super::state::{RunState, StateError};
use super::trace::ExecutionTrace;
use crate::config::WorkflowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        })
    }
}

/// Terminal value of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub similarity: f64,
    pub report: String,
    /// Merged text produced by the comparison step.
    pub result: String,
}

impl RunResult {
    fn from_state(state: &RunState) -> Result<Self, StateError> {
        state.read(|s| {
            Ok(Self {
                similarity: s.similarity.get()?,
                report: s.report.get()?,
                result: s.comparison_text.get()?,
            })
        })?
    }
}

/// A completed run with its execution trace.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: Uuid,
    pub document: String,
    pub result: RunResult,
    pub trace: ExecutionTrace,
}

// ═══════════════════════════════════════════════════════════
// Run
// ═══════════════════════════════════════════════════════════

struct Run {
    id: Uuid,
    document: String,
    state: Arc<RunState>,
    joins: JoinAccumulator,
    status: RunStatus,
    started: Instant,
    trace: ExecutionTrace,
}

impl Run {
    fn new(document: String) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            state: Arc::new(RunState::new(id)),
            joins: JoinAccumulator::new(),
            status: RunStatus::Pending,
            started: Instant::now(),
            trace: ExecutionTrace::new(id, document.clone()),
            document,
        }
    }

    /// Move to `next` unless a terminal status was already reached.
    fn transition(&mut self, next: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }

    fn context(&self, step: &'static str) -> StepContext {
        StepContext {
            run_id: self.id,
            step,
            document: self.document.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Supervisor
// ═══════════════════════════════════════════════════════════

pub struct RunSupervisor {
    registry: Arc<StepRegistry>,
    executor: StepExecutor,
    config: WorkflowConfig,
}

impl RunSupervisor {
    pub fn new(registry: StepRegistry, config: WorkflowConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            executor: StepExecutor,
            config,
        }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Execute one run. Each call owns a fresh state store and join accumulator.
    pub async fn start(&self, initial: Event) -> Result<CompletedRun, WorkflowError> {
        let document = self.validate(&initial)?;
        let mut run = Run::new(document);
        run.transition(RunStatus::Running);
        tracing::info!(run_id = %run.id, document = %run.document, "Run started");

        let mut tasks = JoinSet::new();
        let driven = tokio::time::timeout(
            self.config.run_timeout,
            self.drive(&mut run, &mut tasks, initial),
        )
        .await;

        // Close first so a body finishing right now cannot commit.
        run.state.close();
        let abandoned = tasks.len();
        tasks.abort_all();

        let outcome = match driven {
            Ok(Ok(())) => RunResult::from_state(&run.state).map_err(|source| WorkflowError::State {
                step: "supervisor",
                run_id: run.id,
                source,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(WorkflowError::Timeout {
                run_id: run.id,
                document: run.document.clone(),
                limit: self.config.run_timeout,
            }),
        };

        let status = match &outcome {
            Ok(_) => RunStatus::Completed,
            Err(err) if err.is_timeout() => RunStatus::TimedOut,
            Err(_) => RunStatus::Failed,
        };
        run.transition(status);

        let elapsed_ms = run.started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => tracing::info!(
                run_id = %run.id,
                document = %run.document,
                status = %run.status,
                similarity = result.similarity,
                elapsed_ms,
                "Run finished"
            ),
            Err(err) => tracing::warn!(
                run_id = %run.id,
                document = %run.document,
                status = %run.status,
                abandoned,
                pending_joins = ?run.joins.pending_steps(),
                elapsed_ms,
                error = %err,
                "Run finished"
            ),
        }

        outcome.map(|result| CompletedRun {
            run_id: run.id,
            document: run.document,
            result,
            trace: run.trace,
        })
    }

    fn validate(&self, initial: &Event) -> Result<String, WorkflowError> {
        let expected = self.registry.start_kind();
        if initial.kind() != expected {
            return Err(WorkflowError::Validation(format!(
                "expected a '{expected}' event, got '{}'",
                initial.kind()
            )));
        }
        let (path, name) = initial
            .document()
            .ok_or_else(|| WorkflowError::Validation("start event carries no document".into()))?;
        if path.as_os_str().is_empty() {
            return Err(WorkflowError::Validation("file path is empty".into()));
        }
        if name.trim().is_empty() {
            return Err(WorkflowError::Validation("file name is empty".into()));
        }
        Ok(name.to_string())
    }

    /// Dispatch and consume results until the terminal event or a failure.
    async fn drive(
        &self,
        run: &mut Run,
        tasks: &mut JoinSet<Invocation>,
        initial: Event,
    ) -> Result<(), WorkflowError> {
        self.dispatch(run, tasks, initial)?;

        while let Some(joined) = tasks.join_next().await {
            let invocation = joined.map_err(|err| WorkflowError::StepPanicked {
                step: "executor",
                run_id: run.id,
                reason: err.to_string(),
            })?;
            run.trace.record(invocation.record);

            match invocation.result? {
                Some(event) if event.kind() == self.registry.terminal_kind() => {
                    tracing::debug!(run_id = %run.id, in_flight = tasks.len(), "Terminal event received");
                    return Ok(());
                }
                Some(event) => self.dispatch(run, tasks, event)?,
                None => {}
            }
        }

        Err(WorkflowError::Stalled { run_id: run.id })
    }

    fn dispatch(
        &self,
        run: &mut Run,
        tasks: &mut JoinSet<Invocation>,
        event: Event,
    ) -> Result<(), WorkflowError> {
        let kind = event.kind();
        let targets = self.registry.route(kind);
        if targets.is_empty() {
            tracing::debug!(run_id = %run.id, event = %kind, "Event has no consumer");
        }

        for descriptor in targets {
            let inputs = if descriptor.is_join() {
                match run.joins.offer(descriptor.name(), descriptor.triggers(), event.clone()) {
                    Ok(JoinOutcome::Complete(inputs)) => inputs,
                    Ok(JoinOutcome::Pending { received, required }) => {
                        tracing::debug!(
                            run_id = %run.id,
                            step = descriptor.name(),
                            received,
                            required,
                            "Join waiting"
                        );
                        continue;
                    }
                    Err(join::JoinError::Duplicate { step, kind }) => {
                        return Err(WorkflowError::DuplicateJoinInput {
                            step,
                            kind,
                            run_id: run.id,
                        });
                    }
                    Err(join::JoinError::Unexpected { step, kind }) => {
                        return Err(WorkflowError::UnexpectedJoinInput { step, kind });
                    }
                }
            } else {
                vec![event.clone()]
            };

            self.log_dispatch(run, descriptor.name(), kind);
            tasks.spawn(self.executor.invoke(
                Arc::clone(descriptor),
                inputs,
                run.context(descriptor.name()),
                run.started,
            ));
        }
        Ok(())
    }

    fn log_dispatch(&self, run: &Run, step: &'static str, trigger: EventKind) {
        if self.config.verbose {
            tracing::info!(run_id = %run.id, step, trigger = %trigger, "Running step");
        } else {
            tracing::debug!(run_id = %run.id, step, trigger = %trigger, "Running step");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::workflow::error::StepError;
    use crate::workflow::registry::{StepDescriptor, StepRegistryBuilder};

    fn start() -> Event {
        Event::start("/tmp/sample.pdf", "sample.pdf")
    }

    fn builder() -> StepRegistryBuilder {
        StepRegistry::builder(EventKind::Start, EventKind::Classified)
    }

    fn start_step() -> StepDescriptor {
        StepDescriptor::from_fn("start", [EventKind::Start], Some(EventKind::DocumentReady), |_, inputs| {
            let (path, name) = inputs[0].document().map(|(p, n)| (p.clone(), n.to_string())).unwrap();
            Ok(Some(Event::DocumentReady { file_path: path, file_name: name }))
        })
    }

    /// Terminal step that writes every result slot.
    fn finish_step(trigger: EventKind) -> StepDescriptor {
        StepDescriptor::from_fn("finish", [trigger], Some(EventKind::Classified), |ctx, _| {
            ctx.state.edit_scoped(|s| -> Result<(), StepError> {
                s.similarity.set(1.0)?;
                s.comparison_text.set("done".into())?;
                s.report.set("MATCH".into())?;
                Ok(())
            })?;
            Ok(Some(Event::Classified { report: "MATCH".into() }))
        })
    }

    fn supervisor(registry: StepRegistry) -> RunSupervisor {
        RunSupervisor::new(registry, WorkflowConfig::default())
    }

    #[tokio::test]
    async fn completes_and_reads_result_from_state() {
        let registry = builder()
            .register(start_step())
            .register(finish_step(EventKind::DocumentReady))
            .build()
            .unwrap();

        let done = supervisor(registry).start(start()).await.unwrap();
        assert_eq!(done.document, "sample.pdf");
        assert_eq!(
            done.result,
            RunResult { similarity: 1.0, report: "MATCH".into(), result: "done".into() }
        );
        assert_eq!(done.trace.steps(), vec!["start", "finish"]);
    }

    #[tokio::test]
    async fn invalid_start_event_is_rejected_before_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let registry = builder()
            .register(StepDescriptor::from_fn("start", [EventKind::Start], None, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }))
            .build()
            .unwrap();
        let sup = supervisor(registry);

        let wrong_kind = sup.start(Event::Classified { report: "r".into() }).await;
        assert!(matches!(wrong_kind, Err(WorkflowError::Validation(_))));
        let empty_name = sup.start(Event::start("/tmp/a.pdf", "  ")).await;
        assert!(matches!(empty_name, Err(WorkflowError::Validation(_))));
        let empty_path = sup.start(Event::start("", "a.pdf")).await;
        assert!(matches!(empty_path, Err(WorkflowError::Validation(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_without_terminal_event_stalls() {
        let registry = builder()
            .register(start_step())
            .register(StepDescriptor::from_fn("sink", [EventKind::DocumentReady], None, |_, _| Ok(None)))
            .build()
            .unwrap();

        let err = supervisor(registry).start(start()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Stalled { .. }));
    }

    #[tokio::test]
    async fn duplicate_join_input_fails_the_run() {
        let emit_primary = |name: &'static str| {
            StepDescriptor::from_fn(name, [EventKind::DocumentReady], Some(EventKind::PrimaryExtracted), |_, _| {
                Ok(Some(Event::PrimaryExtracted { text: "A".into() }))
            })
        };
        let registry = builder()
            .register(start_step())
            .register(emit_primary("primary_a"))
            .register(emit_primary("primary_b"))
            .register(StepDescriptor::from_fn(
                "compare",
                [EventKind::PrimaryExtracted, EventKind::SecondaryExtracted],
                Some(EventKind::Classified),
                |_, _| Ok(Some(Event::Classified { report: "r".into() })),
            ))
            .build()
            .unwrap();

        let err = supervisor(registry).start(start()).await.unwrap_err();
        match err {
            WorkflowError::DuplicateJoinInput { step, kind, .. } => {
                assert_eq!(step, "compare");
                assert_eq!(kind, EventKind::PrimaryExtracted);
            }
            other => panic!("expected duplicate join input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn never_returning_step_times_out_and_late_commit_is_rejected() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (committed_tx, committed_rx) = mpsc::channel();
        let gate = Mutex::new(release_rx);
        let report = Mutex::new(committed_tx);

        let registry = builder()
            .register(start_step())
            .register(StepDescriptor::from_fn("stuck", [EventKind::DocumentReady], None, move |ctx, _| {
                if let Ok(rx) = gate.lock() {
                    let _ = rx.recv();
                }
                let late = ctx.state.edit_scoped(|s| s.report.set("late".into()));
                if let Ok(tx) = report.lock() {
                    let _ = tx.send(late);
                }
                Ok(None)
            }))
            .build()
            .unwrap();

        let sup = RunSupervisor::new(
            registry,
            WorkflowConfig::default().with_timeout(Duration::from_millis(100)),
        );
        let started = Instant::now();
        let err = sup.start(start()).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));

        // Unblock the abandoned body: its edit must bounce off the closed store.
        drop(release_tx);
        let late = tokio::task::spawn_blocking(move || committed_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(late, Err(StateError::RunClosed(_))));
    }

    #[tokio::test]
    async fn events_after_terminal_are_ignored() {
        let late_runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&late_runs);
        let registry = builder()
            .register(start_step())
            .register(finish_step(EventKind::DocumentReady))
            .register(StepDescriptor::from_fn(
                "slow",
                [EventKind::DocumentReady],
                Some(EventKind::Compared),
                |_, _| {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(Some(Event::Compared { merged_text: "x".into(), similarity: 0.1 }))
                },
            ))
            .register(StepDescriptor::from_fn("after", [EventKind::Compared], None, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }))
            .build()
            .unwrap();

        let done = supervisor(registry).start(start()).await.unwrap();
        assert_eq!(done.result.report, "MATCH");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(late_runs.load(Ordering::SeqCst), 0);
        assert!(done.trace.find("slow").is_none());
    }

    #[test]
    fn status_transitions_once() {
        let mut run = Run::new("a.pdf".into());
        assert!(run.transition(RunStatus::Running));
        assert!(run.transition(RunStatus::Failed));
        assert!(!run.transition(RunStatus::Completed));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(RunStatus::TimedOut.to_string(), "TIMED_OUT");
    }

    #[test]
    fn run_result_serializes_as_mapping() {
        let json = serde_json::to_value(RunResult {
            similarity: 1.0,
            report: "MATCH".into(),
            result: "INV-100 $50.00".into(),
        })
        .unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(json["similarity"], 1.0);
        assert_eq!(json["report"], "MATCH");
        assert_eq!(json["result"], "INV-100 $50.00");
    }
}
