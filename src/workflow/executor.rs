//! Step Executor: runs step bodies on the blocking pool.
//!
//! Bodies call synchronous collaborators (PDF parsing, blocking HTTP), so each
//! invocation goes through `spawn_blocking` and is awaited from the run's
//! coordination task. A panicking body surfaces as a `JoinError`, which is
//! mapped to [`WorkflowError::StepPanicked`].

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use super::error::{StepError, WorkflowError};
use super::events::Event;
use super::registry::{StepContext, StepDescriptor};
use super::trace::{StepOutcome, StepRecord};

/// Result of one invocation, as handed back to the supervisor.
#[derive(Debug)]
pub struct Invocation {
    pub record: StepRecord,
    pub result: Result<Option<Event>, WorkflowError>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepExecutor;

impl StepExecutor {
    /// Run `descriptor` with `inputs` and wait for it.
    ///
    /// `run_started` anchors the trace offsets.
    pub async fn invoke(
        self,
        descriptor: Arc<StepDescriptor>,
        inputs: Vec<Event>,
        ctx: StepContext,
        run_started: Instant,
    ) -> Invocation {
        let step = descriptor.name();
        let triggers = inputs.iter().map(Event::kind).collect();
        let started = Instant::now();

        tracing::debug!(run_id = %ctx.run_id, step, document = %ctx.document, "Step started");

        let body = descriptor.body();
        let body_ctx = ctx.clone();
        let joined = tokio::task::spawn_blocking(move || body.run(&body_ctx, inputs)).await;

        let result = match joined {
            Ok(Ok(Some(event))) if descriptor.output() == Some(event.kind()) => Ok(Some(event)),
            Ok(Ok(Some(event))) => Err(WorkflowError::UndeclaredOutput {
                step,
                emitted: event.kind(),
                declared: descriptor.output(),
            }),
            Ok(Ok(None)) => Ok(None),
            Ok(Err(err)) => Err(step_failure(err, &ctx)),
            Err(join_err) => Err(WorkflowError::StepPanicked {
                step,
                run_id: ctx.run_id,
                reason: if join_err.is_panic() {
                    panic_reason(join_err.into_panic())
                } else {
                    "blocking task cancelled".to_string()
                },
            }),
        };

        let duration = started.elapsed();
        let outcome = match &result {
            Ok(_) => {
                tracing::debug!(
                    run_id = %ctx.run_id,
                    step,
                    duration_ms = duration.as_millis() as u64,
                    "Step finished"
                );
                StepOutcome::Succeeded
            }
            Err(err) => {
                tracing::error!(
                    run_id = %ctx.run_id,
                    step,
                    document = %ctx.document,
                    error = %err,
                    "Step failed"
                );
                StepOutcome::Failed(err.to_string())
            }
        };

        let record = StepRecord {
            step,
            triggers,
            emitted: result.as_ref().ok().and_then(|e| e.as_ref().map(Event::kind)),
            started_ms: started.duration_since(run_started).as_millis() as u64,
            duration_ms: duration.as_millis() as u64,
            outcome,
        };
        Invocation { record, result }
    }
}

fn step_failure(err: StepError, ctx: &StepContext) -> WorkflowError {
    match err {
        StepError::Collaborator(source) => WorkflowError::Collaborator {
            step: ctx.step,
            run_id: ctx.run_id,
            document: ctx.document.clone(),
            source,
        },
        StepError::State(source) => WorkflowError::State {
            step: ctx.step,
            run_id: ctx.run_id,
            source,
        },
        StepError::InvalidInput(detail) => WorkflowError::InvalidInput {
            step: ctx.step,
            run_id: ctx.run_id,
            detail,
        },
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::pipeline::CollaboratorError;
    use crate::workflow::events::EventKind;
    use crate::workflow::state::{RunState, StateError, StateField};

    fn ctx(step: &'static str) -> StepContext {
        let run_id = Uuid::new_v4();
        StepContext {
            run_id,
            step,
            document: "sample.pdf".into(),
            state: Arc::new(RunState::new(run_id)),
        }
    }

    fn descriptor<F>(name: &'static str, output: Option<EventKind>, body: F) -> Arc<StepDescriptor>
    where
        F: Fn(&StepContext, Vec<Event>) -> Result<Option<Event>, StepError> + Send + Sync + 'static,
    {
        Arc::new(StepDescriptor::from_fn(name, [EventKind::Start], output, body))
    }

    #[tokio::test]
    async fn successful_body_emits_declared_event() {
        let step = descriptor("start", Some(EventKind::Classified), |_, _| {
            Ok(Some(Event::Classified { report: "MATCH".into() }))
        });
        let inv = StepExecutor
            .invoke(step, vec![Event::start("a", "a")], ctx("start"), Instant::now())
            .await;

        assert!(matches!(inv.result, Ok(Some(Event::Classified { .. }))));
        assert_eq!(inv.record.triggers, vec![EventKind::Start]);
        assert_eq!(inv.record.emitted, Some(EventKind::Classified));
        assert_eq!(inv.record.outcome, StepOutcome::Succeeded);
    }

    #[tokio::test]
    async fn blocking_body_is_timed() {
        let step = descriptor("start", None, |_, _| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(None)
        });
        let inv = StepExecutor
            .invoke(step, vec![Event::start("a", "a")], ctx("start"), Instant::now())
            .await;
        assert!(matches!(inv.result, Ok(None)));
        assert!(inv.record.duration_ms >= 5);
    }

    #[tokio::test]
    async fn collaborator_error_carries_run_identity() {
        let c = ctx("extract_primary");
        let run_id = c.run_id;
        let step = descriptor("extract_primary", None, |_, _| {
            Err(CollaboratorError::Extraction("engine crashed".into()).into())
        });
        let inv = StepExecutor.invoke(step, vec![], c, Instant::now()).await;

        match inv.result {
            Err(WorkflowError::Collaborator { step, run_id: id, document, .. }) => {
                assert_eq!(step, "extract_primary");
                assert_eq!(id, run_id);
                assert_eq!(document, "sample.pdf");
            }
            other => panic!("expected collaborator failure, got {other:?}"),
        }
        assert!(matches!(inv.record.outcome, StepOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn state_violation_maps_to_state_error() {
        let step = descriptor("classify", None, |ctx, _| {
            ctx.state.edit_scoped(|s| s.report.set("a".into()))?;
            ctx.state.edit_scoped(|s| s.report.set("b".into()))?;
            Ok(None)
        });
        let inv = StepExecutor.invoke(step, vec![], ctx("classify"), Instant::now()).await;
        assert!(matches!(
            inv.result,
            Err(WorkflowError::State {
                source: StateError::FieldAlreadySet(StateField::Report),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn panic_becomes_step_panicked() {
        let step = descriptor("compare", None, |_, _| panic!("comparator exploded"));
        let inv = StepExecutor.invoke(step, vec![], ctx("compare"), Instant::now()).await;
        match inv.result {
            Err(WorkflowError::StepPanicked { step, reason, .. }) => {
                assert_eq!(step, "compare");
                assert!(reason.contains("comparator exploded"));
            }
            other => panic!("expected panic mapping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undeclared_output_is_rejected() {
        let step = descriptor("start", Some(EventKind::DocumentReady), |_, _| {
            Ok(Some(Event::Classified { report: "r".into() }))
        });
        let inv = StepExecutor.invoke(step, vec![], ctx("start"), Instant::now()).await;
        assert!(matches!(
            inv.result,
            Err(WorkflowError::UndeclaredOutput { emitted: EventKind::Classified, .. })
        ));
    }
}
