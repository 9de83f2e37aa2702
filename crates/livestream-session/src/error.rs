//! Error types for the session module.

use std::fmt;

use thiserror::Error;

use livestream_ipc::{EngineError, EngineOperation, SessionPhase, Track};

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Operation not valid in the current phase.
    #[error("{operation} is not valid in phase {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },

    /// Join already in flight or complete.
    #[error("Session is already joining or joined")]
    AlreadyJoiningOrJoined,

    /// Operation precondition not met.
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    /// Configuration rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine reported a failure.
    #[error("Engine failure: {0}")]
    EngineFailure(#[source] EngineError),

    /// Some publish mutations failed; the rest were committed.
    #[error("Publish mutations failed: {}", format_failures(.0))]
    PartialMutationFailure(Vec<MutationFailure>),
}

impl SessionError {
    /// The failed mutations, if this is a partial mutation failure.
    pub fn failed_mutations(&self) -> &[MutationFailure] {
        match self {
            Self::PartialMutationFailure(failures) => failures,
            _ => &[],
        }
    }
}

/// A single publish-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishMutation {
    AudioMute,
    VideoMute,
    ScreenShare,
}

impl PublishMutation {
    /// Engine call that carries out this mutation.
    pub fn operation(self, enable: bool) -> EngineOperation {
        match (self, enable) {
            (Self::AudioMute, _) => EngineOperation::SetMuted(Track::Audio),
            (Self::VideoMute, _) => EngineOperation::SetMuted(Track::Video),
            (Self::ScreenShare, true) => EngineOperation::StartScreenShare,
            (Self::ScreenShare, false) => EngineOperation::StopScreenShare,
        }
    }
}

impl fmt::Display for PublishMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AudioMute => "audio mute",
            Self::VideoMute => "video mute",
            Self::ScreenShare => "screen share",
        })
    }
}

/// A publish mutation the engine rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub mutation: PublishMutation,
    pub cause: EngineError,
}

fn format_failures(failures: &[MutationFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.mutation, f.cause))
        .collect::<Vec<_>>()
        .join(", ")
}
