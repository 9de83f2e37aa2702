//! Scripted engine and recording observer for tests.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use livestream_ipc::{
    ChannelStats, EngineError, ParticipantId, ScreenShareParams, SessionConfig, SessionEvent, Track,
};

use crate::engine::{
    EngineEventSink, EngineNotification, JoinCallback, LeaveCallback, MediaEngine, SessionHandle,
};
use crate::observer::SessionObserver;

/// Calls made into the engine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateSession,
    RegisterSink,
    Join,
    Leave,
    SetMuted(Track, bool),
    SwitchCamera,
    StartScreenShare,
    StopScreenShare,
    Release,
}

/// Engine calls that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fail {
    CreateSession,
    JoinCall,
    LeaveCall,
    Mute(Track),
    SwitchCamera,
    ScreenShare,
}

/// Engine that records calls and holds callbacks until the test resolves them.
#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<Fail>>,
    pending_join: Mutex<Option<JoinCallback>>,
    pending_leave: Mutex<Option<LeaveCallback>>,
    sink: Mutex<Option<Arc<dyn EngineEventSink>>>,
    auto_leave: Mutex<bool>,
    sync_join: Mutex<Option<ParticipantId>>,
    leave_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    on_create: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Engine whose leave completes synchronously with default stats.
    pub fn with_auto_leave() -> Arc<Self> {
        let engine = Self::default();
        *engine.auto_leave.lock() = true;
        Arc::new(engine)
    }

    pub fn fail(&self, what: Fail) {
        self.failing.lock().insert(what);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn complete_join(&self, result: Result<ParticipantId, EngineError>) {
        let callback = self.pending_join.lock().take().expect("no pending join");
        callback(result);
    }

    pub fn complete_leave(&self, result: Result<ChannelStats, EngineError>) {
        let callback = self.pending_leave.lock().take().expect("no pending leave");
        callback(result);
    }

    /// Resolve joins inside the `join` call with `id`.
    pub fn resolve_joins_with(&self, id: ParticipantId) {
        *self.sync_join.lock() = Some(id);
    }

    /// Block the next `leave` before it is recorded.
    ///
    /// Returns a receiver signalled once `leave` is entered and a sender
    /// that lets it continue.
    pub fn hold_leave(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *self.leave_gate.lock() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Run `hook` inside the next `create_session`, after it is recorded.
    pub fn on_create_session(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_create.lock() = Some(Box::new(hook));
    }

    pub fn notify(&self, notification: EngineNotification) {
        let sink = self.sink.lock().clone().expect("no sink registered");
        sink.notify(notification);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, what: Fail) -> Result<(), EngineError> {
        if self.failing.lock().contains(&what) {
            Err(EngineError::new(-1, format!("{:?} rejected", what)))
        } else {
            Ok(())
        }
    }
}

impl MediaEngine for ScriptedEngine {
    fn create_session(&self, _config: &SessionConfig) -> Result<SessionHandle, EngineError> {
        self.record(Call::CreateSession);
        self.check(Fail::CreateSession)?;
        let hook = self.on_create.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(SessionHandle::new(1))
    }

    fn register_sink(&self, _handle: SessionHandle, sink: Arc<dyn EngineEventSink>) {
        self.record(Call::RegisterSink);
        *self.sink.lock() = Some(sink);
    }

    fn join(&self, _handle: SessionHandle, on_result: JoinCallback) -> Result<(), EngineError> {
        self.record(Call::Join);
        self.check(Fail::JoinCall)?;
        let sync_join = *self.sync_join.lock();
        match sync_join {
            Some(id) => on_result(Ok(id)),
            None => *self.pending_join.lock() = Some(on_result),
        }
        Ok(())
    }

    fn leave(&self, _handle: SessionHandle, on_result: LeaveCallback) -> Result<(), EngineError> {
        let gate = self.leave_gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.record(Call::Leave);
        self.check(Fail::LeaveCall)?;
        if *self.auto_leave.lock() {
            on_result(Ok(ChannelStats::default()));
        } else {
            *self.pending_leave.lock() = Some(on_result);
        }
        Ok(())
    }

    fn set_muted(&self, _handle: SessionHandle, track: Track, muted: bool) -> Result<(), EngineError> {
        self.record(Call::SetMuted(track, muted));
        self.check(Fail::Mute(track))
    }

    fn switch_camera(&self, _handle: SessionHandle) -> Result<(), EngineError> {
        self.record(Call::SwitchCamera);
        self.check(Fail::SwitchCamera)
    }

    fn start_screen_share(
        &self,
        _handle: SessionHandle,
        _params: &ScreenShareParams,
    ) -> Result<(), EngineError> {
        self.record(Call::StartScreenShare);
        self.check(Fail::ScreenShare)
    }

    fn stop_screen_share(&self, _handle: SessionHandle) -> Result<(), EngineError> {
        self.record(Call::StopScreenShare);
        self.check(Fail::ScreenShare)
    }

    fn release(&self, _handle: SessionHandle) {
        self.record(Call::Release);
    }
}

/// Observer that keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    /// Events other than `PhaseChanged`.
    pub fn lifecycle(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| !matches!(e, SessionEvent::PhaseChanged { .. }))
            .cloned()
            .collect()
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<livestream_ipc::SessionPhase> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::PhaseChanged { current, .. } => Some(*current),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}
