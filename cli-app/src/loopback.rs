//! In-process media engine for the demo.
//!
//! Join and leave resolve on short-lived threads after a fixed delay, which
//! is enough to exercise the coordinator's asynchronous paths. Remote
//! participants and statistics are injected by the caller.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use livestream_ipc::{
    ChannelStats, EngineError, OfflineReason, ParticipantId, ScreenShareParams, SessionConfig,
    Track,
};
use livestream_relay::{FrameSink, RelayError, RelayResult, SampleFrame};
use livestream_session::{
    EngineEventSink, EngineNotification, JoinCallback, LeaveCallback, MediaEngine, SessionHandle,
};

/// Error code for calls on a handle the engine does not know.
const ERR_UNKNOWN_SESSION: i32 = -2;

/// Error code for calls that need a joined session.
const ERR_NOT_IN_CHANNEL: i32 = -7;

/// First id handed out when the config does not request one.
const FIRST_ASSIGNED_ID: u64 = 10_000;

#[derive(Default)]
struct LoopbackSession {
    sink: Option<Arc<dyn EngineEventSink>>,
    requested_id: Option<ParticipantId>,
    joined_at: Option<Instant>,
    remotes: BTreeSet<ParticipantId>,
    screen_share: Option<ScreenShareParams>,
}

/// Counters for samples pushed through the ingestion sink.
#[derive(Debug, Default)]
struct IngestStats {
    active: bool,
    frames: u64,
    bytes: u64,
}

/// Loopback media engine.
pub struct LoopbackEngine {
    delay: Duration,
    next_handle: AtomicU64,
    next_id: AtomicU64,
    sessions: Arc<Mutex<HashMap<SessionHandle, LoopbackSession>>>,
    ingest: Mutex<IngestStats>,
}

impl LoopbackEngine {
    /// Create an engine whose join and leave resolve after `delay`.
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            next_handle: AtomicU64::new(1),
            next_id: AtomicU64::new(FIRST_ASSIGNED_ID),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ingest: Mutex::new(IngestStats::default()),
        })
    }

    /// A remote participant enters every joined session.
    pub fn remote_joined(&self, id: ParticipantId) {
        self.broadcast(|session| {
            session
                .remotes
                .insert(id)
                .then_some(EngineNotification::RemoteJoined { id })
        });
    }

    /// A remote participant leaves every joined session.
    pub fn remote_left(&self, id: ParticipantId, reason: OfflineReason) {
        self.broadcast(|session| {
            session
                .remotes
                .remove(&id)
                .then_some(EngineNotification::RemoteLeft { id, reason })
        });
    }

    /// Report statistics for every joined session.
    pub fn tick_stats(&self) {
        let tx_kbps = if self.ingest.lock().active { 2_400 } else { 800 };
        self.broadcast(|session| {
            Some(EngineNotification::Stats(ChannelStats {
                tx_kbps,
                tx_packet_loss_percent: 0.5,
                rx_packet_loss_percent: 0.5,
                ..session_stats(session)
            }))
        });
    }

    /// Frames and bytes received through the ingestion sink.
    pub fn ingested(&self) -> (u64, u64) {
        let ingest = self.ingest.lock();
        (ingest.frames, ingest.bytes)
    }

    fn broadcast(
        &self,
        mut notification: impl FnMut(&mut LoopbackSession) -> Option<EngineNotification>,
    ) {
        let pending: Vec<_> = {
            let mut sessions = self.sessions.lock();
            sessions
                .values_mut()
                .filter(|s| s.joined_at.is_some())
                .filter_map(|s| {
                    let sink = s.sink.clone()?;
                    notification(s).map(|n| (sink, n))
                })
                .collect()
        };

        for (sink, notification) in pending {
            sink.notify(notification);
        }
    }

    fn with_joined<T>(
        &self,
        handle: SessionHandle,
        apply: impl FnOnce(&mut LoopbackSession) -> T,
    ) -> Result<T, EngineError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&handle).ok_or_else(|| unknown_session(handle))?;
        if session.joined_at.is_none() {
            return Err(EngineError::new(ERR_NOT_IN_CHANNEL, "not in channel"));
        }
        Ok(apply(session))
    }
}

fn unknown_session(handle: SessionHandle) -> EngineError {
    EngineError::new(ERR_UNKNOWN_SESSION, format!("unknown {}", handle))
}

fn session_stats(session: &LoopbackSession) -> ChannelStats {
    ChannelStats {
        duration_secs: session
            .joined_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0),
        rx_kbps: 600 * session.remotes.len() as u32,
        rtt_ms: 42,
        user_count: session.remotes.len() as u32 + 1,
        ..Default::default()
    }
}

impl MediaEngine for LoopbackEngine {
    fn create_session(&self, config: &SessionConfig) -> Result<SessionHandle, EngineError> {
        let handle = SessionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sessions.lock().insert(
            handle,
            LoopbackSession {
                requested_id: config.requested_id,
                ..Default::default()
            },
        );
        info!(%handle, channel = %config.credentials.channel, "Loopback session created");
        Ok(handle)
    }

    fn register_sink(&self, handle: SessionHandle, sink: Arc<dyn EngineEventSink>) {
        match self.sessions.lock().get_mut(&handle) {
            Some(session) => session.sink = Some(sink),
            None => warn!(%handle, "Sink for unknown session"),
        }
    }

    fn join(&self, handle: SessionHandle, on_result: JoinCallback) -> Result<(), EngineError> {
        let requested = self
            .sessions
            .lock()
            .get(&handle)
            .ok_or_else(|| unknown_session(handle))?
            .requested_id;
        let id = requested
            .unwrap_or_else(|| ParticipantId(self.next_id.fetch_add(1, Ordering::Relaxed)));

        let sessions = Arc::clone(&self.sessions);
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let joined = match sessions.lock().get_mut(&handle) {
                Some(session) => {
                    session.joined_at = Some(Instant::now());
                    true
                }
                None => false,
            };
            if joined {
                debug!(%handle, %id, "Loopback join complete");
                on_result(Ok(id));
            } else {
                on_result(Err(unknown_session(handle)));
            }
        });
        Ok(())
    }

    fn leave(&self, handle: SessionHandle, on_result: LeaveCallback) -> Result<(), EngineError> {
        if !self.sessions.lock().contains_key(&handle) {
            return Err(unknown_session(handle));
        }

        let sessions = Arc::clone(&self.sessions);
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let stats = sessions.lock().get_mut(&handle).map(|session| {
                let stats = session_stats(session);
                session.joined_at = None;
                session.remotes.clear();
                session.screen_share = None;
                stats
            });
            debug!(%handle, "Loopback leave complete");
            on_result(stats.ok_or_else(|| unknown_session(handle)));
        });
        Ok(())
    }

    fn set_muted(&self, handle: SessionHandle, track: Track, muted: bool) -> Result<(), EngineError> {
        self.with_joined(handle, |_| debug!(%handle, ?track, muted, "Loopback mute"))
    }

    fn switch_camera(&self, handle: SessionHandle) -> Result<(), EngineError> {
        self.with_joined(handle, |_| debug!(%handle, "Loopback camera switched"))
    }

    fn start_screen_share(
        &self,
        handle: SessionHandle,
        params: &ScreenShareParams,
    ) -> Result<(), EngineError> {
        self.with_joined(handle, |session| session.screen_share = Some(*params))?;
        info!(%handle, width = params.width, height = params.height, "Loopback screen share started");
        Ok(())
    }

    fn stop_screen_share(&self, handle: SessionHandle) -> Result<(), EngineError> {
        self.with_joined(handle, |session| session.screen_share = None)?;
        info!(%handle, "Loopback screen share stopped");
        Ok(())
    }

    fn release(&self, handle: SessionHandle) {
        if self.sessions.lock().remove(&handle).is_some() {
            debug!(%handle, "Loopback session released");
        }
    }
}

impl FrameSink for LoopbackEngine {
    fn start(&self) -> RelayResult<()> {
        let sharing = self
            .sessions
            .lock()
            .values()
            .any(|s| s.screen_share.is_some());
        if !sharing {
            return Err(RelayError::Sink("no session is sharing its screen".to_string()));
        }
        self.ingest.lock().active = true;
        Ok(())
    }

    fn pause(&self) -> RelayResult<()> {
        self.ingest.lock().active = false;
        Ok(())
    }

    fn resume(&self) -> RelayResult<()> {
        self.ingest.lock().active = true;
        Ok(())
    }

    fn stop(&self) -> RelayResult<()> {
        let ingest = std::mem::take(&mut *self.ingest.lock());
        info!(frames = ingest.frames, bytes = ingest.bytes, "Loopback ingest stopped");
        Ok(())
    }

    fn push(&self, frame: SampleFrame) -> RelayResult<()> {
        let mut ingest = self.ingest.lock();
        if !ingest.active {
            return Err(RelayError::Sink("ingest is not active".to_string()));
        }
        ingest.frames += 1;
        ingest.bytes += frame.data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;
    use crossbeam_channel::bounded;

    use livestream_relay::SampleTimestamp;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn joined(engine: &LoopbackEngine, config: &SessionConfig) -> (SessionHandle, ParticipantId) {
        let handle = engine.create_session(config).unwrap();
        let (tx, rx) = bounded(1);
        engine
            .join(
                handle,
                Box::new(move |result: Result<ParticipantId, EngineError>| {
                    tx.send(result).unwrap();
                }),
            )
            .unwrap();
        let id = rx.recv_timeout(WAIT).unwrap().unwrap();
        (handle, id)
    }

    #[test]
    fn test_join_assigns_requested_id() {
        let engine = LoopbackEngine::new(Duration::from_millis(1));
        let config = SessionConfig::broadcaster("app", "room", "")
            .with_requested_id(ParticipantId(77));

        let (_, id) = joined(&engine, &config);
        assert_eq!(id, ParticipantId(77));

        let (_, id) = joined(&engine, &SessionConfig::broadcaster("app", "room", ""));
        assert_eq!(id, ParticipantId(FIRST_ASSIGNED_ID));
    }

    #[test]
    fn test_mutations_need_joined_session() {
        let engine = LoopbackEngine::new(Duration::from_millis(1));
        let handle = engine
            .create_session(&SessionConfig::broadcaster("app", "room", ""))
            .unwrap();

        let err = engine.set_muted(handle, Track::Audio, true).unwrap_err();
        assert_eq!(err.code, ERR_NOT_IN_CHANNEL);

        let err = engine.switch_camera(SessionHandle::new(999)).unwrap_err();
        assert_eq!(err.code, ERR_UNKNOWN_SESSION);
    }

    #[test]
    fn test_leave_reports_stats() {
        let engine = LoopbackEngine::new(Duration::from_millis(1));
        let (handle, _) = joined(&engine, &SessionConfig::broadcaster("app", "room", ""));
        engine.remote_joined(ParticipantId(5));

        let (tx, rx) = bounded(1);
        engine
            .leave(
                handle,
                Box::new(move |result: Result<ChannelStats, EngineError>| {
                    tx.send(result).unwrap();
                }),
            )
            .unwrap();
        let stats = rx.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(stats.user_count, 2);

        engine.release(handle);
        let noop: LeaveCallback = Box::new(|_: Result<ChannelStats, EngineError>| {});
        assert!(engine.leave(handle, noop).is_err());
    }

    #[test]
    fn test_ingest_requires_screen_share() {
        let engine = LoopbackEngine::new(Duration::from_millis(1));
        assert!(FrameSink::start(engine.as_ref()).is_err());

        let (handle, _) = joined(&engine, &SessionConfig::broadcaster("app", "room", ""));
        engine
            .start_screen_share(handle, &ScreenShareParams::default())
            .unwrap();
        FrameSink::start(engine.as_ref()).unwrap();

        let frame = SampleFrame::video(
            Bytes::from(vec![0u8; 6]),
            2,
            2,
            SampleTimestamp::now(Instant::now()),
            0,
        );
        FrameSink::push(engine.as_ref(), frame).unwrap();
        assert_eq!(engine.ingested(), (1, 6));
    }
}
