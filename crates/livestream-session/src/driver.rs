//! Command loop driving a coordinator from a channel.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use livestream_ipc::{SessionCommand, SessionEvent};

use crate::coordinator::SessionCoordinator;
use crate::engine::MediaEngine;
use crate::observer::SessionObserver;
use crate::SessionResult;

/// Applies caller commands to a coordinator it owns.
pub struct SessionDriver {
    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,
    coordinator: SessionCoordinator,
}

impl SessionDriver {
    /// Create a driver whose coordinator reports to `event_tx`.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        command_rx: Receiver<SessionCommand>,
        event_tx: Sender<SessionEvent>,
    ) -> Self {
        let observer: Arc<dyn SessionObserver> = Arc::new(event_tx.clone());
        Self {
            command_rx,
            event_tx,
            coordinator: SessionCoordinator::new(engine, observer),
        }
    }

    /// Run the driver (blocking) until shutdown or channel disconnect.
    #[instrument(name = "driver_run", skip(self))]
    pub fn run(&mut self) {
        info!("Session driver starting");
        self.send_event(SessionEvent::Ready);

        while let Ok(command) = self.command_rx.recv() {
            if !self.handle_command(command) {
                break;
            }
        }

        if let Err(e) = self.coordinator.leave() {
            warn!("Leave on driver exit failed: {}", e);
        }
        info!("Session driver stopped");
    }

    /// Handle a command. Returns false if the driver should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, "Handling command");
        let name = command.name();

        let result = match command {
            SessionCommand::Configure { config } => self.coordinator.configure(config),
            SessionCommand::Join => self.coordinator.join(),
            SessionCommand::Leave => self.coordinator.leave(),
            SessionCommand::UpdatePublishState {
                audio_muted,
                video_muted,
                screen_share_active,
            } => self
                .coordinator
                .update_publish_state(audio_muted, video_muted, screen_share_active),
            SessionCommand::SwitchCamera => self.coordinator.switch_camera(),
            SessionCommand::GetState => {
                self.send_event(SessionEvent::Snapshot(self.coordinator.snapshot()));
                Ok(())
            }
            SessionCommand::Shutdown => {
                self.report(name, self.coordinator.leave());
                self.send_event(SessionEvent::Shutdown);
                return false;
            }
        };

        self.report(name, result);
        true
    }

    fn report(&self, command: &str, result: SessionResult<()>) {
        if let Err(e) = result {
            warn!(command, "Command failed: {}", e);
            self.send_event(SessionEvent::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            });
        }
    }

    fn send_event(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use livestream_ipc::{ParticipantId, SessionConfig, SessionPhase};

    use super::*;
    use crate::testing::{Call, ScriptedEngine};

    fn wait_for(
        rx: &Receiver<SessionEvent>,
        mut matches: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("timed out waiting for event");
            if matches(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_driver_lifecycle() {
        let engine = ScriptedEngine::with_auto_leave();
        let (command_tx, command_rx) = livestream_ipc::command_channel();
        let (event_tx, event_rx) = livestream_ipc::event_channel();

        let mut driver = SessionDriver::new(engine.clone(), command_rx, event_tx);
        let handle = thread::spawn(move || driver.run());

        wait_for(&event_rx, |e| *e == SessionEvent::Ready);

        command_tx
            .send(SessionCommand::Configure {
                config: SessionConfig::broadcaster("app", "Test", ""),
            })
            .unwrap();
        command_tx.send(SessionCommand::Join).unwrap();
        command_tx.send(SessionCommand::GetState).unwrap();

        match wait_for(&event_rx, |e| matches!(e, SessionEvent::Snapshot(_))) {
            SessionEvent::Snapshot(snapshot) => assert_eq!(snapshot.phase, SessionPhase::Joining),
            _ => unreachable!(),
        }

        engine.complete_join(Ok(ParticipantId(9)));
        wait_for(&event_rx, |e| matches!(e, SessionEvent::Joined { .. }));

        command_tx.send(SessionCommand::Join).unwrap();
        match wait_for(&event_rx, |e| matches!(e, SessionEvent::CommandFailed { .. })) {
            SessionEvent::CommandFailed { command, .. } => assert_eq!(command, "join"),
            _ => unreachable!(),
        }

        command_tx.send(SessionCommand::Shutdown).unwrap();
        wait_for(&event_rx, |e| matches!(e, SessionEvent::Left { .. }));
        wait_for(&event_rx, |e| *e == SessionEvent::Shutdown);
        handle.join().unwrap();

        assert_eq!(engine.count(&Call::Join), 1);
        assert_eq!(engine.count(&Call::Leave), 1);
        assert_eq!(engine.count(&Call::Release), 1);
    }

    #[test]
    fn test_driver_stops_when_commands_disconnect() {
        let engine = ScriptedEngine::new();
        let (command_tx, command_rx) = livestream_ipc::command_channel();
        let (event_tx, event_rx) = livestream_ipc::event_channel();

        let mut driver = SessionDriver::new(engine, command_rx, event_tx);
        let handle = thread::spawn(move || driver.run());

        wait_for(&event_rx, |e| *e == SessionEvent::Ready);
        drop(command_tx);
        handle.join().unwrap();
    }
}
