//! Run-level error taxonomy.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::events::EventKind;
use super::state::StateError;
use crate::pipeline::CollaboratorError;

/// Failure of a whole run (or of building the workflow).
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid start event: {0}")]
    Validation(String),

    #[error("Step '{step}' failed for '{document}' (run {run_id}): {source}")]
    Collaborator {
        step: &'static str,
        run_id: Uuid,
        document: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Join input '{kind}' delivered twice to step '{step}' (run {run_id})")]
    DuplicateJoinInput {
        step: &'static str,
        kind: EventKind,
        run_id: Uuid,
    },

    #[error("Step '{step}' received '{kind}', which it does not join on")]
    UnexpectedJoinInput { step: &'static str, kind: EventKind },

    #[error("Run {run_id} for '{document}' exceeded its {limit:?} budget")]
    Timeout {
        run_id: Uuid,
        document: String,
        limit: Duration,
    },

    #[error("Step '{step}' violated run state (run {run_id}): {source}")]
    State {
        step: &'static str,
        run_id: Uuid,
        #[source]
        source: StateError,
    },

    #[error("Step '{step}' received unusable input (run {run_id}): {detail}")]
    InvalidInput {
        step: &'static str,
        run_id: Uuid,
        detail: String,
    },

    #[error("Step '{step}' emitted '{emitted}' but declares {declared:?}")]
    UndeclaredOutput {
        step: &'static str,
        emitted: EventKind,
        declared: Option<EventKind>,
    },

    #[error("Step '{step}' panicked (run {run_id}): {reason}")]
    StepPanicked {
        step: &'static str,
        run_id: Uuid,
        reason: String,
    },

    #[error("Run {run_id} stalled: no step in flight and terminal event never emitted")]
    Stalled { run_id: Uuid },

    #[error("Invalid workflow graph: {0}")]
    Registry(String),
}

impl WorkflowError {
    /// Resource/SLA failure rather than a data failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Step that caused the failure, when one did.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Self::Collaborator { step, .. }
            | Self::DuplicateJoinInput { step, .. }
            | Self::UnexpectedJoinInput { step, .. }
            | Self::State { step, .. }
            | Self::InvalidInput { step, .. }
            | Self::UndeclaredOutput { step, .. }
            | Self::StepPanicked { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// What a step body may fail with; the executor adds run identity.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0}")]
    InvalidInput(String),
}
