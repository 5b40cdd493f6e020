//! Error taxonomy for replay operations
//!
//! Every variant is a synchronous, caller-recoverable failure: either a
//! bad argument or an operation attempted against a session in the
//! wrong state. Nothing here is transient, so nothing is retried
//! internally.

use thiserror::Error;

/// Replay operation errors
#[derive(Debug, Error, PartialEq)]
pub enum ReplayError {
    /// Unknown session id, or the session was evicted
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Operation attempted after the session's stream was exhausted
    #[error("session is already terminated: {0}")]
    SessionTerminated(String),

    /// Jump target not present in the event sequence
    #[error("invalid event id: {0}")]
    InvalidEventId(u32),

    /// Replay speed must be strictly positive and finite
    #[error("invalid replay speed: {0}")]
    InvalidSpeed(f64),

    /// Forward skip count must be at least 1
    #[error("invalid skip count: {0}")]
    InvalidSkipCount(usize),
}
