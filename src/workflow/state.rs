//! Run State Store: write-once typed slots shared by every step of one run.
//!
//! Writes go through [`RunState::edit_scoped`]: the mutator works on a staged
//! copy under the write lock and the copy replaces the live slots only when the
//! mutator returns `Ok`. Each slot accepts exactly one write per run.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

/// Named slots of the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    DocumentPath,
    DocumentName,
    PrimaryText,
    SecondaryText,
    Similarity,
    ComparisonText,
    Report,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentPath => "document_path",
            Self::DocumentName => "document_name",
            Self::PrimaryText => "primary_text",
            Self::SecondaryText => "secondary_text",
            Self::Similarity => "similarity",
            Self::ComparisonText => "comparison_text",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("State field '{0}' read before it was written")]
    FieldNotSet(StateField),

    #[error("State field '{0}' was already written in this run")]
    FieldAlreadySet(StateField),

    #[error("Run {0} is closed; late state mutation rejected")]
    RunClosed(Uuid),

    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// Slot
// ═══════════════════════════════════════════════════════════

/// A value that may be written once.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    field: StateField,
    value: Option<T>,
}

impl<T: Clone> Slot<T> {
    fn new(field: StateField) -> Self {
        Self { field, value: None }
    }

    pub fn get(&self) -> Result<T, StateError> {
        self.value.clone().ok_or(StateError::FieldNotSet(self.field))
    }

    pub fn get_or_default(&self) -> T
    where
        T: Default,
    {
        self.value.clone().unwrap_or_default()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn set(&mut self, value: T) -> Result<(), StateError> {
        if self.value.is_some() {
            return Err(StateError::FieldAlreadySet(self.field));
        }
        self.value = Some(value);
        Ok(())
    }
}

/// Mutable view handed to [`RunState::edit_scoped`] mutators.
#[derive(Debug, Clone)]
pub struct StateSlots {
    pub document_path: Slot<PathBuf>,
    pub document_name: Slot<String>,
    pub primary_text: Slot<String>,
    pub secondary_text: Slot<String>,
    pub similarity: Slot<f64>,
    pub comparison_text: Slot<String>,
    pub report: Slot<String>,
}

impl StateSlots {
    fn empty() -> Self {
        Self {
            document_path: Slot::new(StateField::DocumentPath),
            document_name: Slot::new(StateField::DocumentName),
            primary_text: Slot::new(StateField::PrimaryText),
            secondary_text: Slot::new(StateField::SecondaryText),
            similarity: Slot::new(StateField::Similarity),
            comparison_text: Slot::new(StateField::ComparisonText),
            report: Slot::new(StateField::Report),
        }
    }

    fn is_set(&self, field: StateField) -> bool {
        match field {
            StateField::DocumentPath => self.document_path.is_set(),
            StateField::DocumentName => self.document_name.is_set(),
            StateField::PrimaryText => self.primary_text.is_set(),
            StateField::SecondaryText => self.secondary_text.is_set(),
            StateField::Similarity => self.similarity.is_set(),
            StateField::ComparisonText => self.comparison_text.is_set(),
            StateField::Report => self.report.is_set(),
        }
    }
}

/// Untyped read result of [`RunState::get`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Path(PathBuf),
    Text(String),
    Score(f64),
}

impl StateValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_score(&self) -> Option<f64> {
        match self {
            Self::Score(score) => Some(*score),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// RunState
// ═══════════════════════════════════════════════════════════

/// Shared state of one run.
pub struct RunState {
    run_id: Uuid,
    slots: RwLock<Versioned>,
    closed: AtomicBool,
}

struct Versioned {
    version: u64,
    slots: StateSlots,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            slots: RwLock::new(Versioned {
                version: 0,
                slots: StateSlots::empty(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of committed edits so far.
    pub fn version(&self) -> Result<u64, StateError> {
        let guard = self.slots.read().map_err(|_| StateError::LockPoisoned)?;
        Ok(guard.version)
    }

    /// Read one field; fails with `FieldNotSet` before its write.
    pub fn get(&self, field: StateField) -> Result<StateValue, StateError> {
        self.read(|s| match field {
            StateField::DocumentPath => s.document_path.get().map(StateValue::Path),
            StateField::DocumentName => s.document_name.get().map(StateValue::Text),
            StateField::PrimaryText => s.primary_text.get().map(StateValue::Text),
            StateField::SecondaryText => s.secondary_text.get().map(StateValue::Text),
            StateField::Similarity => s.similarity.get().map(StateValue::Score),
            StateField::ComparisonText => s.comparison_text.get().map(StateValue::Text),
            StateField::Report => s.report.get().map(StateValue::Text),
        })?
    }

    /// Like [`get`](Self::get) but an unset field reads as its empty value.
    pub fn get_or_default(&self, field: StateField) -> Result<StateValue, StateError> {
        self.read(|s| match field {
            StateField::DocumentPath => StateValue::Path(s.document_path.get_or_default()),
            StateField::DocumentName => StateValue::Text(s.document_name.get_or_default()),
            StateField::PrimaryText => StateValue::Text(s.primary_text.get_or_default()),
            StateField::SecondaryText => StateValue::Text(s.secondary_text.get_or_default()),
            StateField::Similarity => StateValue::Score(s.similarity.get_or_default()),
            StateField::ComparisonText => StateValue::Text(s.comparison_text.get_or_default()),
            StateField::Report => StateValue::Text(s.report.get_or_default()),
        })
    }

    pub fn is_set(&self, field: StateField) -> Result<bool, StateError> {
        self.read(|s| s.is_set(field))
    }

    /// Run `reader` against a consistent view of the slots.
    pub fn read<R>(&self, reader: impl FnOnce(&StateSlots) -> R) -> Result<R, StateError> {
        let guard = self.slots.read().map_err(|_| StateError::LockPoisoned)?;
        Ok(reader(&guard.slots))
    }

    /// Exclusive, all-or-nothing mutation.
    ///
    /// The mutator receives a staged copy; the copy is committed only when the
    /// mutator returns `Ok`. The lock is released on every exit path.
    pub fn edit_scoped<R, E>(
        &self,
        mutator: impl FnOnce(&mut StateSlots) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StateError>,
    {
        let mut guard = self.slots.write().map_err(|_| StateError::LockPoisoned)?;
        // Checked under the write lock so close() and a late edit cannot race.
        if self.closed.load(Ordering::Acquire) {
            return Err(StateError::RunClosed(self.run_id).into());
        }

        let mut staged = guard.slots.clone();
        let out = mutator(&mut staged)?;
        guard.slots = staged;
        guard.version += 1;
        Ok(out)
    }

    /// Reject every later edit. Reads keep working.
    pub fn close(&self) {
        // Taking the write lock waits out an edit that is mid-commit.
        let _guard = self.slots.write();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
