//! Event-driven run orchestration.
//!
//! A run starts from one [`Event`], is routed through the frozen
//! [`StepRegistry`], and ends when the terminal event is emitted, a step
//! fails, or the run timeout elapses.

pub mod error;
pub mod events;
pub mod executor;
pub mod invoice;
pub mod join;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod trace;

pub use error::{StepError, WorkflowError};
pub use events::{Event, EventKind};
pub use invoice::{Collaborators, Workflow};
pub use registry::{Step, StepContext, StepDescriptor, StepRegistry};
pub use state::{RunState, StateError, StateField};
pub use supervisor::{CompletedRun, RunResult, RunStatus, RunSupervisor};
pub use trace::ExecutionTrace;
