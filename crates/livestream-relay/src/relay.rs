//! Broadcast relay lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{FrameSink, RelayError, RelayResult, SampleFrame};

/// Why a broadcast ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The user stopped the broadcast.
    InitiativeStop,
    /// The sink could not connect to the channel.
    ConnectFail,
    /// The sink lost its channel connection.
    Disconnect,
    Unknown,
}

impl FinishReason {
    /// User-facing failure reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InitiativeStop => "Broadcast stopped",
            Self::ConnectFail => "Could not connect to the channel",
            Self::Disconnect => "Disconnected from the channel",
            Self::Unknown => "Broadcast ended unexpectedly",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Relay lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayState {
    #[default]
    Idle,
    Running,
    Paused,
    Finished(FinishReason),
}

/// Forwards broadcast samples to a sink as they arrive.
pub struct BroadcastRelay {
    sink: Arc<dyn FrameSink>,
    state: Mutex<RelayState>,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastRelay {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(RelayState::Idle),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    /// Samples handed to the sink.
    pub fn relayed_count(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Samples discarded while paused.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start the broadcast.
    #[instrument(name = "relay_start", skip(self))]
    pub fn start(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        match *state {
            RelayState::Idle => {}
            RelayState::Running | RelayState::Paused => return Err(RelayError::AlreadyStarted),
            RelayState::Finished(_) => return Err(RelayError::Finished),
        }

        self.sink.start()?;
        *state = RelayState::Running;
        info!("Broadcast started");
        Ok(())
    }

    /// Pause delivery. Samples pushed while paused are dropped.
    pub fn pause(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        match *state {
            RelayState::Running => {
                self.sink.pause()?;
                *state = RelayState::Paused;
                info!("Broadcast paused");
                Ok(())
            }
            RelayState::Paused => Ok(()),
            RelayState::Idle => Err(RelayError::NotStarted),
            RelayState::Finished(_) => Err(RelayError::Finished),
        }
    }

    pub fn resume(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        match *state {
            RelayState::Paused => {
                self.sink.resume()?;
                *state = RelayState::Running;
                info!("Broadcast resumed");
                Ok(())
            }
            RelayState::Running => Ok(()),
            RelayState::Idle => Err(RelayError::NotStarted),
            RelayState::Finished(_) => Err(RelayError::Finished),
        }
    }

    /// Stop the broadcast at the user's request.
    #[instrument(name = "relay_stop", skip(self))]
    pub fn stop(&self) -> RelayResult<()> {
        let mut state = self.state.lock();
        match *state {
            RelayState::Running | RelayState::Paused => {
                *state = RelayState::Finished(FinishReason::InitiativeStop);
                drop(state);
                info!(
                    relayed = self.relayed_count(),
                    dropped = self.dropped_count(),
                    "Broadcast stopped"
                );
                self.sink.stop()
            }
            RelayState::Idle => Err(RelayError::NotStarted),
            RelayState::Finished(_) => Ok(()),
        }
    }

    /// Forward one sample to the sink.
    ///
    /// The state lock is held across the forward so no sample reaches the
    /// sink after `stop` has finished it.
    pub fn push(&self, frame: SampleFrame) -> RelayResult<()> {
        let state = self.state.lock();
        match *state {
            RelayState::Running => {}
            RelayState::Paused => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    sequence = frame.sequence,
                    pts_ms = frame.timestamp.pts_ms(),
                    dropped,
                    "Dropping sample while paused"
                );
                return Ok(());
            }
            RelayState::Idle => return Err(RelayError::NotStarted),
            RelayState::Finished(_) => return Err(RelayError::Finished),
        }

        frame.validate().map_err(RelayError::InvalidFrame)?;
        self.sink.push(frame)?;
        drop(state);
        self.relayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// The sink ended the broadcast on its own.
    ///
    /// Returns the message to show the user.
    pub fn on_sink_finished(&self, reason: FinishReason) -> String {
        let mut state = self.state.lock();
        match *state {
            RelayState::Finished(previous) => {
                debug!(?previous, ?reason, "Broadcast already finished");
            }
            _ => {
                warn!(?reason, "Broadcast finished by sink");
                *state = RelayState::Finished(reason);
            }
        }
        reason.message().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use crossbeam_channel::{Receiver, Sender};

    use super::*;
    use crate::{SampleKind, SampleTimestamp};

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<&'static str>>,
        pushed: Mutex<Vec<u64>>,
        refuse_start: bool,
        /// Signals entry to `push`, then waits before accepting the sample.
        push_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl FrameSink for RecordingSink {
        fn start(&self) -> RelayResult<()> {
            self.calls.lock().push("start");
            if self.refuse_start {
                return Err(RelayError::Sink("connect refused".to_string()));
            }
            Ok(())
        }

        fn pause(&self) -> RelayResult<()> {
            self.calls.lock().push("pause");
            Ok(())
        }

        fn resume(&self) -> RelayResult<()> {
            self.calls.lock().push("resume");
            Ok(())
        }

        fn stop(&self) -> RelayResult<()> {
            self.calls.lock().push("stop");
            Ok(())
        }

        fn push(&self, frame: SampleFrame) -> RelayResult<()> {
            let gate = self.push_gate.lock().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.recv();
            }
            self.calls.lock().push("push");
            self.pushed.lock().push(frame.sequence);
            Ok(())
        }
    }

    fn frame(sequence: u64) -> SampleFrame {
        SampleFrame::video(
            Bytes::from(vec![0u8; 6]),
            2,
            2,
            SampleTimestamp::now(Instant::now()),
            sequence,
        )
    }

    fn relay() -> (BroadcastRelay, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (BroadcastRelay::new(sink.clone()), sink)
    }

    #[test]
    fn test_lifecycle_forwards_to_sink() {
        let (relay, sink) = relay();

        relay.start().unwrap();
        relay.pause().unwrap();
        relay.resume().unwrap();
        relay.stop().unwrap();

        assert_eq!(*sink.calls.lock(), vec!["start", "pause", "resume", "stop"]);
        assert_eq!(
            relay.state(),
            RelayState::Finished(FinishReason::InitiativeStop)
        );
    }

    #[test]
    fn test_push_while_running_and_paused() {
        let (relay, sink) = relay();
        relay.start().unwrap();

        relay.push(frame(0)).unwrap();
        relay.pause().unwrap();
        relay.push(frame(1)).unwrap();
        relay.push(frame(2)).unwrap();
        relay.resume().unwrap();
        relay
            .push(SampleFrame::audio(
                SampleKind::AppAudio,
                Bytes::from_static(&[0; 4]),
                SampleTimestamp::now(Instant::now()),
                3,
            ))
            .unwrap();

        assert_eq!(*sink.pushed.lock(), vec![0, 3]);
        assert_eq!(relay.relayed_count(), 2);
        assert_eq!(relay.dropped_count(), 2);
    }

    #[test]
    fn test_push_outside_broadcast() {
        let (relay, _sink) = relay();
        assert_eq!(relay.push(frame(0)).unwrap_err(), RelayError::NotStarted);

        relay.start().unwrap();
        relay.stop().unwrap();
        assert_eq!(relay.push(frame(1)).unwrap_err(), RelayError::Finished);
        assert_eq!(relay.start().unwrap_err(), RelayError::Finished);
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let (relay, sink) = relay();
        relay.start().unwrap();

        let bad = SampleFrame::video(
            Bytes::from(vec![0u8; 5]),
            2,
            2,
            SampleTimestamp::now(Instant::now()),
            0,
        );
        assert!(matches!(relay.push(bad), Err(RelayError::InvalidFrame(_))));
        assert!(sink.pushed.lock().is_empty());
        assert_eq!(relay.relayed_count(), 0);
    }

    #[test]
    fn test_start_failure_stays_idle() {
        let sink = Arc::new(RecordingSink {
            refuse_start: true,
            ..Default::default()
        });
        let relay = BroadcastRelay::new(sink);

        assert!(matches!(relay.start(), Err(RelayError::Sink(_))));
        assert_eq!(relay.state(), RelayState::Idle);
    }

    #[test]
    fn test_sink_finished() {
        let (relay, sink) = relay();
        relay.start().unwrap();

        let message = relay.on_sink_finished(FinishReason::Disconnect);
        assert_eq!(message, "Disconnected from the channel");
        assert_eq!(relay.state(), RelayState::Finished(FinishReason::Disconnect));

        relay.on_sink_finished(FinishReason::Unknown);
        assert_eq!(relay.state(), RelayState::Finished(FinishReason::Disconnect));
        relay.stop().unwrap();
        assert!(!sink.calls.lock().contains(&"stop"));
    }

    #[test]
    fn test_double_start() {
        let (relay, _sink) = relay();
        relay.start().unwrap();
        assert_eq!(relay.start().unwrap_err(), RelayError::AlreadyStarted);
    }

    #[test]
    fn test_stop_waits_for_push_in_flight() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let sink = Arc::new(RecordingSink {
            push_gate: Mutex::new(Some((entered_tx, release_rx))),
            ..Default::default()
        });
        let relay = Arc::new(BroadcastRelay::new(sink.clone()));
        relay.start().unwrap();

        let pusher = {
            let relay = relay.clone();
            thread::spawn(move || relay.push(frame(0)))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let stopper = {
            let relay = relay.clone();
            thread::spawn(move || relay.stop())
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        pusher.join().unwrap().unwrap();
        stopper.join().unwrap().unwrap();
        assert_eq!(*sink.calls.lock(), vec!["start", "push", "stop"]);
        assert_eq!(relay.relayed_count(), 1);
    }
}
