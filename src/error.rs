//! Custom error types for the si-score-server.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with clear messages and proper error conversion.

use std::io;
use thiserror::Error;

/// Primary error type for the application, covering all possible error cases.
#[derive(Debug, Error)]
pub enum AppError {
    /// Inbound frame too short to carry a request id.
    #[error("request shorter than the 8-byte request id")]
    MalformedRequestId,

    /// Audio segment is not a whole number of 32-bit samples.
    #[error("audio payload has {0} trailing bytes that do not form a sample")]
    MalformedAudio(usize),

    /// Admission controller rejected the request at the ceiling.
    #[error("outstanding request ceiling reached")]
    QueueFull,

    /// The worker pool computation failed for any reason.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// Errors from invalid configuration or model loading.
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors in the multiplexed socket layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// The short machine-readable tag surfaced in the `error` field of a
    /// wire response. Anything that reaches a client after admission maps
    /// to `InferenceFailed`.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            AppError::MalformedRequestId => "MalformedRequestId",
            AppError::MalformedAudio(_) => "MalformedAudio",
            AppError::QueueFull => "QueueFull",
            _ => "InferenceFailed",
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type Result<T> = std::result::Result<T, AppError>;
