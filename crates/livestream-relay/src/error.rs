//! Error types for the relay module.

use thiserror::Error;

/// Errors that can occur while relaying a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Broadcast not started.
    #[error("Broadcast not started")]
    NotStarted,

    /// Broadcast already started.
    #[error("Broadcast already started")]
    AlreadyStarted,

    /// Broadcast already finished.
    #[error("Broadcast finished")]
    Finished,

    /// Sample data does not match its declared format.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The sink rejected a call.
    #[error("Sink error: {0}")]
    Sink(String),
}
