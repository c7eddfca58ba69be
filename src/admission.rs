//! Admission gate: one run at a time.
//!
//! Both extraction collaborators and the comparison/classification models are
//! heavyweight; two runs in parallel would compete for the same local engines.
//! Callers that process several documents go through the gate:
//! - `acquire()` waits until the gate is free
//! - `try_acquire()` returns `None` if a run is in progress
//! - `current_run()` reports which document is being processed and since when

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Snapshot of the admitted run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRun {
    pub document: String,
    /// RFC 3339.
    pub started_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Admission gate is closed")]
    Closed,
}

// ═══════════════════════════════════════════════════════════
// AdmissionGate
// ═══════════════════════════════════════════════════════════

pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    current: Arc<Mutex<Option<ActiveRun>>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait for the gate, then hold it until the guard is dropped.
    pub async fn acquire(&self, document: &str) -> Result<AdmissionGuard, AdmissionError> {
        if self.is_busy() {
            tracing::info!(document, waiting_on = ?self.current_run().map(|r| r.document), "Waiting for admission");
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(self.admit(permit, document))
    }

    /// Admit without waiting; `None` while another run holds the gate.
    pub fn try_acquire(&self, document: &str) -> Option<AdmissionGuard> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        Some(self.admit(permit, document))
    }

    /// `None` when idle.
    pub fn current_run(&self) -> Option<ActiveRun> {
        self.current.lock().ok()?.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Refuse every later `acquire`; guards already handed out stay valid.
    pub fn close(&self) {
        self.permits.close();
    }

    // ── Internal ────────────────────────────────────────────

    fn admit(&self, permit: OwnedSemaphorePermit, document: &str) -> AdmissionGuard {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(ActiveRun {
                document: document.to_string(),
                started_at: chrono::Utc::now().to_rfc3339(),
            });
        }
        tracing::debug!(document, "Run admitted");
        AdmissionGuard {
            _permit: permit,
            current: Arc::clone(&self.current),
        }
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// AdmissionGuard: RAII admission token
// ═══════════════════════════════════════════════════════════

/// Dropping the guard clears the active run and frees the gate.
pub struct AdmissionGuard {
    _permit: OwnedSemaphorePermit,
    current: Arc<Mutex<Option<ActiveRun>>>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        // Cleared before the permit field drops, so the next holder's state is never wiped.
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}
