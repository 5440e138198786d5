//! Admission control for in-flight requests.
//!
//! The controller bounds how many requests may be outstanding at once. A
//! successful admit hands back an RAII permit; dropping the permit is the
//! release, so a slot can never leak on any exit path of the admitted work.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds concurrently admitted requests against a startup-time ceiling.
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    ceiling: usize,
}

/// Held for the lifetime of one admitted request.
///
/// Dropping the permit releases the slot exactly once, including on panic
/// unwind of the holding task.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    /// Create a controller with the given ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    /// Try to admit one request.
    ///
    /// Returns `None` without blocking when the ceiling is reached. A
    /// rejection never touches the worker pool, so it stays cheap under
    /// full load.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Requests currently admitted.
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.permits.available_permits()
    }
}
