//! Session observer capability.

use crossbeam_channel::Sender;
use tracing::warn;

use livestream_ipc::SessionEvent;

/// Receives session events in emission order.
///
/// Called outside the coordinator's state lock, so implementations may
/// query or command the coordinator.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

impl SessionObserver for Sender<SessionEvent> {
    fn on_event(&self, event: SessionEvent) {
        if let Err(e) = self.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: SessionEvent) {}
}
