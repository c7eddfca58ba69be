//! Collaborator contracts and per-invocation leases.
//!
//! Steps never hold collaborators across invocations. Each invocation calls
//! [`Provider::acquire`], works through the returned [`Lease`], and the lease
//! is dropped on every exit path (success, error, or panic unwinding).

use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::llm::LlmError;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Comparison failed: {0}")]
    Comparison(String),

    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

// ═══════════════════════════════════════════════════════════
// Contracts
// ═══════════════════════════════════════════════════════════

/// Turns a document into text. Two independent implementations run
/// concurrently in every run, so implementations must not share mutable state.
pub trait TextExtractor: Send {
    fn extract(&self, document_path: &Path, document_name: &str)
        -> Result<String, CollaboratorError>;
}

/// Merged view of two extractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub merged_text: String,
    /// In `[0.0, 1.0]`.
    pub similarity: f64,
}

impl Comparison {
    /// Force the score into `[0.0, 1.0]`; NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        if self.similarity.is_nan() {
            self.similarity = 0.0;
        }
        self.similarity = self.similarity.clamp(0.0, 1.0);
        self
    }

    pub fn in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.similarity)
    }
}

pub trait ResultComparator: Send {
    fn compare(
        &self,
        document_name: &str,
        primary: &str,
        secondary: &str,
    ) -> Result<Comparison, CollaboratorError>;
}

pub trait ReportClassifier: Send {
    fn classify(
        &self,
        document_path: &Path,
        document_name: &str,
        merged_text: &str,
        similarity: f64,
    ) -> Result<String, CollaboratorError>;
}

// ═══════════════════════════════════════════════════════════
// Provider / Lease
// ═══════════════════════════════════════════════════════════

type Factory<T> = dyn Fn() -> Result<Box<T>, CollaboratorError> + Send + Sync;

/// Builds a fresh collaborator for each step invocation and counts live leases.
pub struct Provider<T: ?Sized> {
    label: &'static str,
    factory: Arc<Factory<T>>,
    live: Arc<AtomicUsize>,
}

impl<T: ?Sized> Clone for Provider<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            factory: Arc::clone(&self.factory),
            live: Arc::clone(&self.live),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("label", &self.label)
            .field("live", &self.live_leases())
            .finish()
    }
}

impl<T: ?Sized> Provider<T> {
    pub fn new<F>(label: &'static str, factory: F) -> Self
    where
        F: Fn() -> Result<Box<T>, CollaboratorError> + Send + Sync + 'static,
    {
        Self {
            label,
            factory: Arc::new(factory),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Build a collaborator for one invocation.
    pub fn acquire(&self) -> Result<Lease<T>, CollaboratorError> {
        let inner = (self.factory)()?;
        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(collaborator = self.label, "Collaborator acquired");
        Ok(Lease {
            label: self.label,
            inner,
            live: Arc::clone(&self.live),
        })
    }

    /// Leases not yet dropped.
    pub fn live_leases(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Provider<dyn TextExtractor> {
    pub fn extractor<E, F>(label: &'static str, make: F) -> Self
    where
        E: TextExtractor + 'static,
        F: Fn() -> Result<E, CollaboratorError> + Send + Sync + 'static,
    {
        Self::new(label, move || make().map(|e| Box::new(e) as Box<dyn TextExtractor>))
    }
}

impl Provider<dyn ResultComparator> {
    pub fn comparator<C, F>(label: &'static str, make: F) -> Self
    where
        C: ResultComparator + 'static,
        F: Fn() -> Result<C, CollaboratorError> + Send + Sync + 'static,
    {
        Self::new(label, move || make().map(|c| Box::new(c) as Box<dyn ResultComparator>))
    }
}

impl Provider<dyn ReportClassifier> {
    pub fn classifier<C, F>(label: &'static str, make: F) -> Self
    where
        C: ReportClassifier + 'static,
        F: Fn() -> Result<C, CollaboratorError> + Send + Sync + 'static,
    {
        Self::new(label, move || make().map(|c| Box::new(c) as Box<dyn ReportClassifier>))
    }
}

/// RAII handle to a collaborator built for one invocation.
///
/// Dropping the lease releases the collaborator and decrements the provider's
/// live count.
pub struct Lease<T: ?Sized> {
    label: &'static str,
    inner: Box<T>,
    live: Arc<AtomicUsize>,
}

impl<T: ?Sized> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> Drop for Lease<T> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(collaborator = self.label, "Collaborator released");
    }
}
