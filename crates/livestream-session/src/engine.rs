//! Media engine capability consumed by the coordinator.

use std::fmt;
use std::sync::Arc;

use livestream_ipc::{
    ChannelStats, EngineError, OfflineReason, ParticipantId, ScreenShareParams, SessionConfig,
    Track,
};

/// Handle to a session created by a [`MediaEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wrap an engine-specific session identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Completion of an asynchronous join.
pub type JoinCallback = Box<dyn FnOnce(Result<ParticipantId, EngineError>) + Send + 'static>;

/// Completion of an asynchronous leave.
pub type LeaveCallback = Box<dyn FnOnce(Result<ChannelStats, EngineError>) + Send + 'static>;

/// Unsolicited notifications from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// A remote participant joined.
    RemoteJoined { id: ParticipantId },

    /// A remote participant left.
    RemoteLeft {
        id: ParticipantId,
        reason: OfflineReason,
    },

    /// Periodic channel statistics.
    Stats(ChannelStats),

    /// Non-fatal engine warning.
    Warning { code: i32 },

    /// Connection to the channel is gone for good.
    ConnectionLost { cause: EngineError },
}

/// Receiver for engine notifications.
pub trait EngineEventSink: Send + Sync {
    /// Called on the engine's notification thread.
    fn notify(&self, notification: EngineNotification);
}

/// A real-time media engine.
///
/// `join` and `leave` complete through their callback, which is invoked
/// exactly once unless the call itself returns `Err`. The callback may run
/// on any thread, including synchronously inside the call.
pub trait MediaEngine: Send + Sync {
    /// Allocate a session for the given configuration.
    fn create_session(&self, config: &SessionConfig) -> Result<SessionHandle, EngineError>;

    /// Register the receiver for notifications about `handle`.
    fn register_sink(&self, handle: SessionHandle, sink: Arc<dyn EngineEventSink>);

    /// Start joining the channel.
    fn join(&self, handle: SessionHandle, on_result: JoinCallback) -> Result<(), EngineError>;

    /// Start leaving the channel.
    fn leave(&self, handle: SessionHandle, on_result: LeaveCallback) -> Result<(), EngineError>;

    /// Mute or unmute a local track.
    fn set_muted(&self, handle: SessionHandle, track: Track, muted: bool)
        -> Result<(), EngineError>;

    /// Switch between front and back camera.
    fn switch_camera(&self, handle: SessionHandle) -> Result<(), EngineError>;

    /// Start publishing the screen.
    fn start_screen_share(
        &self,
        handle: SessionHandle,
        params: &ScreenShareParams,
    ) -> Result<(), EngineError>;

    /// Stop publishing the screen.
    fn stop_screen_share(&self, handle: SessionHandle) -> Result<(), EngineError>;

    /// Free everything associated with `handle`.
    fn release(&self, handle: SessionHandle);
}
