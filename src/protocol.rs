//! Wire codec for score requests and responses.
//!
//! An inbound frame is a little-endian u64 request id followed by tightly
//! packed little-endian IEEE-754 f32 audio samples. The sample count is
//! implicit in the remaining byte count; a remainder that does not divide
//! into whole samples is rejected rather than truncated. Responses are a
//! single JSON object carrying the request id and exactly one of `result`
//! or `error`.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Width of the request id prefix on the wire.
pub const REQUEST_ID_BYTES: usize = 8;

/// Width of one audio sample on the wire.
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// A decoded inbound request. Lives only for one handling task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    /// Client-chosen identifier, echoed verbatim in the response.
    pub request_id: u64,

    /// Raw audio samples.
    pub audio: Vec<f32>,
}

/// The outbound response payload. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    /// Request id copied from the request; absent only when the request was
    /// too short to carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,

    /// Scores for the request, one per evaluated window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<f32>>,

    /// Machine-readable error tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoreResponse {
    /// Build a success response.
    pub fn success(request_id: u64, scores: Vec<f32>) -> Self {
        Self {
            request_id: Some(request_id),
            result: Some(scores),
            error: None,
        }
    }

    /// Build an error response carrying the error's wire tag.
    pub fn failure(request_id: Option<u64>, error: &AppError) -> Self {
        Self {
            request_id,
            result: None,
            error: Some(error.wire_tag().to_string()),
        }
    }
}

/// Read the request id prefix from an inbound frame.
pub fn read_request_id(frame: &[u8]) -> Result<u64> {
    let prefix: [u8; REQUEST_ID_BYTES] = frame
        .get(..REQUEST_ID_BYTES)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(AppError::MalformedRequestId)?;
    Ok(u64::from_le_bytes(prefix))
}

/// Decode the audio segment of an inbound frame into samples.
pub fn decode_samples(payload: &[u8]) -> Result<Vec<f32>> {
    let remainder = payload.len() % BYTES_PER_SAMPLE;
    if remainder != 0 {
        return Err(AppError::MalformedAudio(remainder));
    }
    Ok(payload
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decode a whole inbound frame.
pub fn decode_request(frame: &[u8]) -> Result<ScoreRequest> {
    let request_id = read_request_id(frame)?;
    let audio = decode_samples(&frame[REQUEST_ID_BYTES..])?;
    Ok(ScoreRequest { request_id, audio })
}
