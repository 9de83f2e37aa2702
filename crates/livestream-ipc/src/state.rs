//! Session state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of one channel membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Constructed, not yet joining.
    #[default]
    Idle,

    /// Join issued, waiting for the engine.
    Joining,

    /// Member of the channel.
    Joined,

    /// Leave issued, waiting for the engine.
    Leaving,

    /// Left the channel, engine session released.
    Left,

    /// Join or connection failed. Terminal.
    Failed,
}

impl SessionPhase {
    /// Returns true if the phase permits the given transition.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        matches!(
            (self, next),
            (Idle, Joining)
                | (Joining, Joined)
                | (Joining, Leaving)
                | (Joining, Failed)
                | (Joined, Leaving)
                | (Joined, Failed)
                | (Leaving, Left)
        )
    }

    /// Returns true if no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Left | Self::Failed)
    }

    /// Returns true if a join is in flight or complete.
    pub fn is_joining_or_joined(self) -> bool {
        matches!(self, Self::Joining | Self::Joined)
    }

    /// Returns a simple string representation of the phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Joining => "Joining",
            Self::Joined => "Joined",
            Self::Leaving => "Leaving",
            Self::Left => "Left",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a remote participant went offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    /// Left the channel.
    Quit,

    /// Timed out (no packets for a while).
    Dropped,

    /// Switched from broadcaster to audience.
    BecameAudience,
}

impl OfflineReason {
    /// Returns a display message for this reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::Quit => "left the channel",
            Self::Dropped => "connection dropped",
            Self::BecameAudience => "became audience",
        }
    }
}

/// Last-known status of a remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantStatus {
    Online,
    Offline { reason: OfflineReason },
}

impl ParticipantStatus {
    /// Returns true if the participant is online.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}
