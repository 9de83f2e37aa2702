//! Events sent from the session to its observer.

use serde::{Deserialize, Serialize};

use crate::state::{ParticipantStatus, SessionPhase};
use crate::types::{
    ChannelStats, EngineError, EngineOperation, ParticipantId, PublishState, QualityWarning,
    SessionSnapshot,
};

/// Events that a session can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Local participant joined the channel.
    Joined {
        /// Id assigned by the engine.
        local_id: ParticipantId,
    },

    /// Join or connection failed. The session cannot be reused.
    SessionFailed {
        /// Engine error, verbatim.
        cause: EngineError,
    },

    /// A remote participant came online or went offline.
    ParticipantChanged {
        id: ParticipantId,
        status: ParticipantStatus,
    },

    /// Local participant left the channel.
    Left {
        /// Final channel stats, when the engine reported them.
        stats: Option<ChannelStats>,
    },

    /// Session phase has changed.
    PhaseChanged {
        previous: SessionPhase,
        current: SessionPhase,
    },

    /// Local publish state has changed.
    PublishStateChanged(PublishState),

    /// Periodic channel statistics.
    Stats(ChannelStats),

    /// Quality warning detected.
    QualityWarning(QualityWarning),

    /// An engine call failed without ending the session.
    EngineError {
        operation: EngineOperation,
        cause: EngineError,
    },

    /// Driver is ready for commands.
    Ready,

    /// Answer to a state query.
    Snapshot(SessionSnapshot),

    /// A command was rejected or failed.
    CommandFailed {
        /// Command name.
        command: String,

        /// Error message.
        message: String,
    },

    /// Driver has shut down.
    Shutdown,
}

impl SessionEvent {
    /// Returns a simple string representation of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "Joined",
            Self::SessionFailed { .. } => "SessionFailed",
            Self::ParticipantChanged { .. } => "ParticipantChanged",
            Self::Left { .. } => "Left",
            Self::PhaseChanged { .. } => "PhaseChanged",
            Self::PublishStateChanged(_) => "PublishStateChanged",
            Self::Stats(_) => "Stats",
            Self::QualityWarning(_) => "QualityWarning",
            Self::EngineError { .. } => "EngineError",
            Self::Ready => "Ready",
            Self::Snapshot(_) => "Snapshot",
            Self::CommandFailed { .. } => "CommandFailed",
            Self::Shutdown => "Shutdown",
        }
    }
}
