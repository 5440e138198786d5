//! Service metrics tracking.
//!
//! Counters and gauges for the dispatch loop, exported as JSON.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Tracks request counts, in-flight load, and failure totals.
#[derive(Debug)]
pub struct ServiceMetrics {
    /// Total number of messages received
    total_requests: AtomicU64,

    /// Requests currently admitted and being scored
    in_flight: AtomicU32,

    /// Maximum concurrently admitted requests observed
    max_in_flight: AtomicU32,

    /// Requests rejected by the admission controller
    rejected_requests: AtomicU64,

    /// Frames that failed to decode
    decode_failures: AtomicU64,

    /// Admitted requests whose inference failed
    inference_failures: AtomicU64,

    /// Responses successfully handed to the transport
    responses_sent: AtomicU64,

    /// Server start time
    start_time: Instant,
}

impl ServiceMetrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            rejected_requests: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an inbound message.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Record an admitted request entering the pool.
    pub fn increment_in_flight(&self) {
        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);
    }

    /// Record an admitted request leaving the pool.
    pub fn decrement_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record a rejection at the ceiling.
    pub fn record_rejection(&self) {
        self.rejected_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a frame that failed to decode.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed inference.
    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a response handed to the transport.
    pub fn record_response(&self) {
        self.responses_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Get all metrics as a serde_json::Value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_seconds": self.start_time.elapsed().as_secs(),
            "total_requests": self.total_requests.load(Ordering::SeqCst),
            "in_flight": self.in_flight.load(Ordering::SeqCst),
            "max_in_flight": self.max_in_flight.load(Ordering::SeqCst),
            "rejected_requests": self.rejected_requests.load(Ordering::SeqCst),
            "decode_failures": self.decode_failures.load(Ordering::SeqCst),
            "inference_failures": self.inference_failures.load(Ordering::SeqCst),
            "responses_sent": self.responses_sent.load(Ordering::SeqCst),
        })
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
