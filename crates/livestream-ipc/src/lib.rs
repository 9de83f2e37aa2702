//! Typed caller<->session messages for livestream.
//!
//! This crate defines the configuration, state, command and event types
//! exchanged between an application and a session coordinator.

mod commands;
mod events;
mod state;
mod types;

pub use commands::SessionCommand;
pub use events::SessionEvent;
pub use state::{OfflineReason, ParticipantStatus, SessionPhase};
pub use types::{
    CameraFacing, ChannelStats, Credentials, EncoderHints, EngineError, EngineOperation,
    LatencyTier, ParticipantId, PublishFlags, PublishSource, PublishState, QualityWarning, Role,
    ScreenShareParams, SessionConfig, SessionSnapshot, Track, MAX_CHANNEL_NAME_LEN,
    SCREEN_SHARE_BOUNDS,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (caller → session).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (session → caller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<SessionCommand>, Receiver<SessionCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
