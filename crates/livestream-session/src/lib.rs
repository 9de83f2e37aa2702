//! Lifecycle coordinator for one real-time media channel membership.
//!
//! This crate sits between an application and a real-time media engine:
//! it drives configure, join, in-session publish changes and leave, turns
//! engine callbacks into ordered session events, and tears the engine
//! session down when the coordinator is dropped.

mod coordinator;
mod driver;
mod engine;
mod error;
mod metrics;
mod observer;
mod state;

#[cfg(test)]
mod testing;

pub use coordinator::SessionCoordinator;
pub use driver::SessionDriver;
pub use engine::{
    EngineEventSink, EngineNotification, JoinCallback, LeaveCallback, MediaEngine, SessionHandle,
};
pub use error::{MutationFailure, PublishMutation, SessionError};
pub use metrics::StatsTracker;
pub use observer::{NullObserver, SessionObserver};
pub use state::SessionState;

use crossbeam_channel::{Receiver, Sender};

use livestream_ipc::{SessionCommand, SessionEvent};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Packet loss percentage above which a quality warning is raised.
pub const HIGH_PACKET_LOSS_PERCENT: f32 = 10.0;

/// Round-trip time in milliseconds above which a quality warning is raised.
pub const HIGH_RTT_MS: u32 = 400;

/// Create a driver instance with command/event channels.
pub fn create_driver(
    engine: std::sync::Arc<dyn MediaEngine>,
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
) -> SessionDriver {
    SessionDriver::new(engine, command_rx, event_tx)
}
