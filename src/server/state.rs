//! Application state for dependency injection.
//!
//! The dispatch loop owns one `ServerState`, shared by reference with every
//! request task. The worker pool and admission controller live here rather
//! than in module-level globals, so they are constructed at startup and torn
//! down at shutdown with the state.

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::scoring::ScorerPool;
use crate::server::metrics::ServiceMetrics;

/// Shared server state containing dependencies.
pub struct ServerState {
    /// The blocking worker pool
    pub pool: ScorerPool,

    /// Admission control over outstanding requests
    pub admission: AdmissionController,

    /// Service metrics
    pub metrics: Arc<ServiceMetrics>,
}

impl ServerState {
    /// Create a new server state.
    ///
    /// # Arguments
    /// * `pool` - The started worker pool
    /// * `max_outstanding` - Ceiling on concurrently admitted requests
    pub fn new(pool: ScorerPool, max_outstanding: usize) -> Self {
        Self {
            pool,
            admission: AdmissionController::new(max_outstanding),
            metrics: Arc::new(ServiceMetrics::new()),
        }
    }
}
