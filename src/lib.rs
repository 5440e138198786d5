//! The `si_score_server` core library.
//!
//! This crate provides a speech-intelligibility scoring server: binary audio
//! requests arrive over a multiplexed socket, pass admission control, are
//! scored on a bounded pool of blocking workers, and are answered to the
//! originating client without blocking other in-flight requests.

pub mod admission;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scoring;
pub mod server;
pub mod transport;
