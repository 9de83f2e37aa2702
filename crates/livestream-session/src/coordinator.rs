//! Session lifecycle coordinator.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, info, instrument, warn};

use livestream_ipc::{
    ChannelStats, EngineError, EngineOperation, OfflineReason, ParticipantId, ParticipantStatus,
    PublishSource, QualityWarning, SessionConfig, SessionEvent, SessionPhase, SessionSnapshot,
    Track,
};

use crate::engine::{EngineEventSink, EngineNotification, MediaEngine, SessionHandle};
use crate::error::{MutationFailure, PublishMutation, SessionError};
use crate::metrics::StatsTracker;
use crate::observer::SessionObserver;
use crate::state::SessionState;
use crate::SessionResult;

/// Drives one channel membership through its lifecycle.
///
/// Dropping the coordinator outside `Left`/`Failed` forces a leave and
/// releases the engine session before the drop returns.
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn MediaEngine>,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<SessionState>,
    /// Events waiting for delivery, in emission order.
    outbox: Mutex<VecDeque<SessionEvent>>,
    /// Held by the thread currently delivering events.
    dispatching: Mutex<()>,
    /// Serializes publish mutations.
    mutations: Mutex<()>,
    /// Held from a forced-leave decision through the engine call, and by
    /// disposal, so a release never overtakes a leave that is being issued.
    teardown: ReentrantMutex<()>,
    stats: StatsTracker,
}

impl SessionCoordinator {
    /// Create an idle coordinator.
    pub fn new(engine: Arc<dyn MediaEngine>, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                observer,
                state: Mutex::new(SessionState::new()),
                outbox: Mutex::new(VecDeque::new()),
                dispatching: Mutex::new(()),
                mutations: Mutex::new(()),
                teardown: ReentrantMutex::new(()),
                stats: StatsTracker::default(),
            }),
        }
    }

    /// Create an idle coordinator with a stored configuration.
    pub fn with_config(
        engine: Arc<dyn MediaEngine>,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let coordinator = Self::new(engine, observer);
        coordinator.configure(config)?;
        Ok(coordinator)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase()
    }

    /// Id assigned by the engine on join.
    pub fn local_id(&self) -> Option<ParticipantId> {
        self.inner.state.lock().local_id()
    }

    /// Serializable copy of the session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Latest channel statistics reported while joined.
    pub fn latest_stats(&self) -> Option<ChannelStats> {
        self.inner.stats.latest()
    }

    /// Store the configuration used by [`join`](Self::join).
    pub fn configure(&self, config: SessionConfig) -> SessionResult<()> {
        let mut state = self.inner.state.lock();
        if state.phase() != SessionPhase::Idle {
            return Err(SessionError::InvalidState {
                operation: "configure",
                phase: state.phase(),
            });
        }
        config.validate().map_err(SessionError::InvalidConfig)?;

        debug!(channel = %config.credentials.channel, role = ?config.role, "Session configured");
        state.config = Some(config);
        Ok(())
    }

    /// Join the configured channel.
    ///
    /// Returns once the engine has accepted the join; completion is reported
    /// through the observer.
    #[instrument(name = "session_join", skip(self))]
    pub fn join(&self) -> SessionResult<()> {
        let config = {
            let mut state = self.inner.state.lock();
            match state.phase() {
                SessionPhase::Idle => {}
                phase if phase.is_joining_or_joined() => {
                    debug!("Already joining or joined, ignoring join");
                    return Err(SessionError::AlreadyJoiningOrJoined);
                }
                phase => {
                    return Err(SessionError::InvalidState {
                        operation: "join",
                        phase,
                    })
                }
            }
            let config = state.config.clone().ok_or_else(|| {
                SessionError::PreconditionNotMet("session is not configured".to_string())
            })?;
            self.inner.transition(&mut state, SessionPhase::Joining);
            config
        };
        self.inner.flush();

        info!(channel = %config.credentials.channel, "Joining channel");

        let handle = match self.inner.engine.create_session(&config) {
            Ok(handle) => handle,
            Err(cause) => {
                error!("Session creation failed: {}", cause);
                self.inner.create_failed(cause.clone());
                return Err(SessionError::EngineFailure(cause));
            }
        };

        {
            let mut state = self.inner.state.lock();
            if state.phase() != SessionPhase::Joining {
                // Left before the engine join was issued; nothing to leave.
                drop(state);
                info!(%handle, "Leave requested before join was issued");
                self.inner.engine.release(handle);
                self.inner.finish_leave(None, None);
                return Ok(());
            }
            state.handle = Some(handle);
        }

        let sink: Arc<dyn EngineEventSink> = Arc::new(CoordinatorSink {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.engine.register_sink(handle, sink);

        let weak = Arc::downgrade(&self.inner);
        let issued = self.inner.engine.join(
            handle,
            Box::new(move |result: Result<ParticipantId, EngineError>| match weak.upgrade() {
                Some(inner) => match result {
                    Ok(id) => inner.on_engine_joined(id),
                    Err(cause) => inner.on_engine_join_failed(cause),
                },
                None => debug!("Join resolved after the session was released"),
            }),
        );

        if let Err(cause) = issued {
            error!("Join call rejected: {}", cause);
            self.inner.on_engine_join_failed(cause.clone());
            return Err(SessionError::EngineFailure(cause));
        }

        Ok(())
    }

    /// Leave the channel.
    ///
    /// While joining, the leave is deferred until the join resolves. In
    /// `Idle`, `Leaving`, `Left` and `Failed` this does nothing.
    #[instrument(name = "session_leave", skip(self))]
    pub fn leave(&self) -> SessionResult<()> {
        let handle = {
            let mut state = self.inner.state.lock();
            match state.phase() {
                SessionPhase::Joining => {
                    info!("Leave requested while joining, deferring until join resolves");
                    self.inner.transition(&mut state, SessionPhase::Leaving);
                    state.leave_after_join = true;
                    None
                }
                SessionPhase::Joined => {
                    info!("Leaving channel");
                    self.inner.transition(&mut state, SessionPhase::Leaving);
                    self.inner.stats.stop();
                    state.handle
                }
                phase => {
                    debug!(%phase, "Nothing to leave");
                    return Ok(());
                }
            }
        };
        self.inner.flush();

        match handle {
            Some(handle) => self
                .inner
                .issue_leave(handle)
                .map_err(SessionError::EngineFailure),
            None => Ok(()),
        }
    }

    /// Change local mute and screen-share state.
    ///
    /// Each changed field is one independent engine call. Calls that succeed
    /// are committed even when others fail; the failures are returned as
    /// [`SessionError::PartialMutationFailure`].
    #[instrument(name = "update_publish_state", skip(self))]
    pub fn update_publish_state(
        &self,
        audio_muted: bool,
        video_muted: bool,
        screen_share_active: bool,
    ) -> SessionResult<()> {
        let serial = self.inner.mutations.lock();

        let (handle, current, screen_params) = {
            let state = self.inner.state.lock();
            if state.phase() != SessionPhase::Joined {
                return Err(SessionError::InvalidState {
                    operation: "update_publish_state",
                    phase: state.phase(),
                });
            }
            let handle = state.handle.ok_or_else(|| {
                SessionError::PreconditionNotMet("no engine session".to_string())
            })?;
            let params = state
                .config
                .as_ref()
                .map(|c| c.screen_share)
                .unwrap_or_default();
            (handle, state.publish_state(), params)
        };

        let engine = &self.inner.engine;
        let mut failures = Vec::new();
        let mut committed = 0;

        if audio_muted != current.audio_muted {
            match engine.set_muted(handle, Track::Audio, audio_muted) {
                Ok(()) => {
                    committed += self.inner.commit(|s| s.audio_muted = audio_muted);
                }
                Err(cause) => failures.push(MutationFailure {
                    mutation: PublishMutation::AudioMute,
                    cause,
                }),
            }
        }

        if video_muted != current.video_muted {
            match engine.set_muted(handle, Track::Video, video_muted) {
                Ok(()) => {
                    committed += self.inner.commit(|s| s.video_muted = video_muted);
                }
                Err(cause) => failures.push(MutationFailure {
                    mutation: PublishMutation::VideoMute,
                    cause,
                }),
            }
        }

        if screen_share_active != current.is_publishing(PublishSource::Screen) {
            let result = if screen_share_active {
                engine.start_screen_share(handle, &screen_params)
            } else {
                engine.stop_screen_share(handle)
            };
            match result {
                Ok(()) => {
                    committed += self
                        .inner
                        .commit(|s| s.set_source(PublishSource::Screen, screen_share_active));
                }
                Err(cause) => failures.push(MutationFailure {
                    mutation: PublishMutation::ScreenShare,
                    cause,
                }),
            }
        }

        {
            let state = self.inner.state.lock();
            let mut events: Vec<SessionEvent> = failures
                .iter()
                .map(|f| SessionEvent::EngineError {
                    operation: f.mutation.operation(screen_share_active),
                    cause: f.cause.clone(),
                })
                .collect();
            if committed > 0 {
                events.push(SessionEvent::PublishStateChanged(state.publish_state()));
            }
            self.inner.enqueue(events);
        }
        drop(serial);
        self.inner.flush();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failed = failures.len(), committed, "Publish update partially failed");
            Err(SessionError::PartialMutationFailure(failures))
        }
    }

    /// Switch between front and back camera.
    pub fn switch_camera(&self) -> SessionResult<()> {
        let serial = self.inner.mutations.lock();

        let handle = {
            let state = self.inner.state.lock();
            let camera_live = state.phase() == SessionPhase::Joined
                && state.is_publishing(PublishSource::Camera)
                && !state.video_muted;
            match state.handle.filter(|_| camera_live) {
                Some(handle) => handle,
                None => {
                    debug!(phase = %state.phase(), "No active camera to switch");
                    return Err(SessionError::PreconditionNotMet(
                        "no active camera publish".to_string(),
                    ));
                }
            }
        };

        let result = self.inner.engine.switch_camera(handle);
        {
            let mut state = self.inner.state.lock();
            match &result {
                Ok(()) if state.phase() == SessionPhase::Joined => {
                    state.camera = state.camera.flipped();
                    debug!(camera = ?state.camera, "Camera switched");
                    self.inner
                        .enqueue([SessionEvent::PublishStateChanged(state.publish_state())]);
                }
                Ok(()) => {}
                Err(cause) => {
                    warn!("Camera switch failed: {}", cause);
                    self.inner.enqueue([SessionEvent::EngineError {
                        operation: EngineOperation::SwitchCamera,
                        cause: cause.clone(),
                    }]);
                }
            }
        }
        drop(serial);
        self.inner.flush();

        result.map_err(SessionError::EngineFailure)
    }

    /// Engine reports a successful join.
    pub fn on_engine_joined(&self, assigned_id: ParticipantId) {
        self.inner.on_engine_joined(assigned_id);
    }

    /// Engine reports a failed join.
    pub fn on_engine_join_failed(&self, cause: EngineError) {
        self.inner.on_engine_join_failed(cause);
    }

    /// A remote participant joined.
    pub fn on_remote_participant_joined(&self, id: ParticipantId) {
        self.inner.on_remote_participant_joined(id);
    }

    /// A remote participant left.
    pub fn on_remote_participant_left(&self, id: ParticipantId, reason: OfflineReason) {
        self.inner.on_remote_participant_left(id, reason);
    }

    /// Engine reports channel statistics.
    pub fn on_engine_stats(&self, stats: ChannelStats) {
        self.inner.on_engine_stats(stats);
    }

    /// Engine reports a non-fatal warning.
    pub fn on_engine_warning(&self, code: i32) {
        self.inner.on_engine_warning(code);
    }

    /// Engine reports that the connection is gone.
    pub fn on_connection_lost(&self, cause: EngineError) {
        self.inner.on_connection_lost(cause);
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl Inner {
    /// Apply a transition and queue its `PhaseChanged` event.
    fn transition(&self, state: &mut SessionState, next: SessionPhase) -> bool {
        match state.advance(next) {
            Some(previous) => {
                debug!(%previous, current = %next, "Phase transition");
                self.enqueue([SessionEvent::PhaseChanged {
                    previous,
                    current: next,
                }]);
                true
            }
            None => false,
        }
    }

    /// Queue events. Callers hold the state lock so queue order matches
    /// transition order.
    fn enqueue(&self, events: impl IntoIterator<Item = SessionEvent>) {
        self.outbox.lock().extend(events);
    }

    /// Deliver queued events outside the state lock.
    ///
    /// Whoever holds `dispatching` drains the whole outbox; everyone else
    /// returns immediately. The re-check after unlocking picks up events
    /// queued while the lock was being released.
    fn flush(&self) {
        loop {
            let Some(guard) = self.dispatching.try_lock() else {
                return;
            };
            loop {
                let next = self.outbox.lock().pop_front();
                match next {
                    Some(event) => self.observer.on_event(event),
                    None => break,
                }
            }
            drop(guard);

            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    /// Apply a mutation if the session is still joined.
    fn commit(&self, apply: impl FnOnce(&mut SessionState)) -> usize {
        let mut state = self.state.lock();
        if state.phase() != SessionPhase::Joined {
            debug!(phase = %state.phase(), "Session no longer joined, mutation not recorded");
            return 0;
        }
        apply(&mut state);
        1
    }

    fn create_failed(&self, cause: EngineError) {
        {
            let mut state = self.state.lock();
            match state.phase() {
                SessionPhase::Joining => {
                    self.transition(&mut state, SessionPhase::Failed);
                    self.enqueue([SessionEvent::SessionFailed { cause }]);
                }
                SessionPhase::Leaving if state.leave_after_join => {
                    state.leave_after_join = false;
                    self.enqueue([SessionEvent::EngineError {
                        operation: EngineOperation::CreateSession,
                        cause,
                    }]);
                    self.transition(&mut state, SessionPhase::Left);
                    state.clear_media();
                    self.enqueue([SessionEvent::Left { stats: None }]);
                }
                phase => debug!(%phase, "Discarding session creation failure"),
            }
        }
        self.flush();
    }

    fn on_engine_joined(self: &Arc<Self>, assigned_id: ParticipantId) {
        let _teardown = self.teardown.lock();
        let forced = {
            let mut state = self.state.lock();
            match state.phase() {
                SessionPhase::Joining => {
                    self.transition(&mut state, SessionPhase::Joined);
                    state.enter_joined(assigned_id);
                    self.stats.start();
                    info!(local_id = %assigned_id, "Joined channel");
                    self.enqueue([SessionEvent::Joined {
                        local_id: assigned_id,
                    }]);
                    None
                }
                SessionPhase::Leaving if state.leave_after_join => {
                    state.leave_after_join = false;
                    info!(local_id = %assigned_id, "Join resolved after local leave, forcing leave");
                    state.handle
                }
                phase => {
                    warn!(%phase, local_id = %assigned_id, "Discarding late join result");
                    None
                }
            }
        };

        if let Some(handle) = forced {
            if let Err(cause) = self.issue_leave(handle) {
                warn!("Forced leave failed: {}", cause);
            }
        }
        self.flush();
    }

    fn on_engine_join_failed(self: &Arc<Self>, cause: EngineError) {
        let _teardown = self.teardown.lock();
        let (release, forced) = {
            let mut state = self.state.lock();
            match state.phase() {
                SessionPhase::Joining => {
                    error!("Join failed: {}", cause);
                    self.transition(&mut state, SessionPhase::Failed);
                    self.enqueue([SessionEvent::SessionFailed { cause }]);
                    (state.handle.take(), None)
                }
                SessionPhase::Leaving if state.leave_after_join => {
                    state.leave_after_join = false;
                    info!("Join failed after local leave, forcing leave: {}", cause);
                    (None, state.handle)
                }
                phase => {
                    warn!(%phase, "Discarding late join failure: {}", cause);
                    (None, None)
                }
            }
        };

        if let Some(handle) = release {
            self.engine.release(handle);
        }
        if let Some(handle) = forced {
            if let Err(cause) = self.issue_leave(handle) {
                warn!("Forced leave failed: {}", cause);
            }
        }
        self.flush();
    }

    /// Call engine leave; completion arrives through `finish_leave`.
    fn issue_leave(self: &Arc<Self>, handle: SessionHandle) -> Result<(), EngineError> {
        let weak = Arc::downgrade(self);
        let issued = self.engine.leave(
            handle,
            Box::new(move |result: Result<ChannelStats, EngineError>| match weak.upgrade() {
                Some(inner) => match result {
                    Ok(stats) => inner.finish_leave(Some(stats), None),
                    Err(cause) => inner.finish_leave(None, Some(cause)),
                },
                None => debug!("Leave resolved after the session was released"),
            }),
        );

        if let Err(cause) = &issued {
            error!("Leave call rejected: {}", cause);
            self.finish_leave(None, Some(cause.clone()));
        }
        issued
    }

    /// Complete a leave: release the engine session and enter `Left`.
    fn finish_leave(&self, stats: Option<ChannelStats>, failure: Option<EngineError>) {
        let handle = {
            let mut state = self.state.lock();
            if state.phase() != SessionPhase::Leaving {
                debug!(phase = %state.phase(), "Discarding leave completion");
                return;
            }
            if let Some(cause) = failure {
                self.enqueue([SessionEvent::EngineError {
                    operation: EngineOperation::Leave,
                    cause,
                }]);
            }
            let handle = state.handle.take();
            state.leave_after_join = false;
            self.transition(&mut state, SessionPhase::Left);
            state.clear_media();
            self.enqueue([SessionEvent::Left { stats }]);
            handle
        };

        if let Some(handle) = handle {
            self.engine.release(handle);
        }
        info!("Left channel");
        self.flush();
    }

    fn on_remote_participant_joined(&self, id: ParticipantId) {
        {
            let mut state = self.state.lock();
            if state.phase() != SessionPhase::Joined {
                debug!(%id, phase = %state.phase(), "Ignoring remote join outside session");
                return;
            }
            if !state.participant_joined(id) {
                debug!(%id, "Participant already online");
                return;
            }
            info!(%id, "Remote participant joined");
            self.enqueue([SessionEvent::ParticipantChanged {
                id,
                status: ParticipantStatus::Online,
            }]);
        }
        self.flush();
    }

    fn on_remote_participant_left(&self, id: ParticipantId, reason: OfflineReason) {
        {
            let mut state = self.state.lock();
            if state.phase() != SessionPhase::Joined {
                debug!(%id, phase = %state.phase(), "Ignoring remote leave outside session");
                return;
            }
            let Some(status) = state.participant_left(id, reason) else {
                return;
            };
            info!(%id, reason = reason.message(), "Remote participant left");
            self.enqueue([SessionEvent::ParticipantChanged { id, status }]);
        }
        self.flush();
    }

    fn on_engine_stats(&self, stats: ChannelStats) {
        {
            let state = self.state.lock();
            if state.phase() != SessionPhase::Joined {
                return;
            }
            let warnings = self.stats.record(&stats);
            self.enqueue(
                std::iter::once(SessionEvent::Stats(stats))
                    .chain(warnings.into_iter().map(SessionEvent::QualityWarning)),
            );
        }
        self.flush();
    }

    fn on_engine_warning(&self, code: i32) {
        {
            let state = self.state.lock();
            if state.phase() != SessionPhase::Joined {
                return;
            }
            debug!(code, "Engine warning");
            self.enqueue([SessionEvent::QualityWarning(QualityWarning::EngineWarning {
                code,
            })]);
        }
        self.flush();
    }

    fn on_connection_lost(&self, cause: EngineError) {
        let handle = {
            let mut state = self.state.lock();
            if state.phase() != SessionPhase::Joined {
                debug!(phase = %state.phase(), "Ignoring connection loss: {}", cause);
                return;
            }
            error!("Connection lost: {}", cause);
            self.transition(&mut state, SessionPhase::Failed);
            state.clear_media();
            self.stats.stop();
            self.enqueue([SessionEvent::SessionFailed { cause }]);
            state.handle.take()
        };

        if let Some(handle) = handle {
            self.engine.release(handle);
        }
        self.flush();
    }

    /// Force a best-effort leave and release before the coordinator goes away.
    fn dispose(&self) {
        let _teardown = self.teardown.lock();
        let (handle, needs_leave) = {
            let mut state = self.state.lock();
            match state.phase() {
                SessionPhase::Idle | SessionPhase::Left | SessionPhase::Failed => return,
                SessionPhase::Joining | SessionPhase::Joined => {
                    self.transition(&mut state, SessionPhase::Leaving);
                    state.leave_after_join = false;
                    (state.handle.take(), true)
                }
                SessionPhase::Leaving => {
                    // A pending join has not been left yet; an issued leave
                    // only needs the release.
                    let pending_join = std::mem::take(&mut state.leave_after_join);
                    (state.handle.take(), pending_join)
                }
            }
        };
        self.flush();

        if let Some(handle) = handle {
            info!(%handle, "Session released while active, forcing leave");
            if needs_leave {
                let issued = self.engine.leave(
                    handle,
                    Box::new(|result: Result<ChannelStats, EngineError>| {
                        if let Err(cause) = result {
                            debug!("Forced leave completed with error: {}", cause);
                        }
                    }),
                );
                if let Err(cause) = issued {
                    warn!("Forced leave failed: {}", cause);
                }
            }
            self.engine.release(handle);
        }

        {
            let mut state = self.state.lock();
            if state.phase() == SessionPhase::Leaving {
                self.stats.stop();
                self.transition(&mut state, SessionPhase::Left);
                state.clear_media();
                self.enqueue([SessionEvent::Left { stats: None }]);
            }
        }
        self.flush();
    }
}

/// Routes engine notifications into the coordinator.
struct CoordinatorSink {
    inner: Weak<Inner>,
}

impl EngineEventSink for CoordinatorSink {
    fn notify(&self, notification: EngineNotification) {
        let Some(inner) = self.inner.upgrade() else {
            debug!(?notification, "Notification after the session was released");
            return;
        };

        match notification {
            EngineNotification::RemoteJoined { id } => inner.on_remote_participant_joined(id),
            EngineNotification::RemoteLeft { id, reason } => {
                inner.on_remote_participant_left(id, reason)
            }
            EngineNotification::Stats(stats) => inner.on_engine_stats(stats),
            EngineNotification::Warning { code } => inner.on_engine_warning(code),
            EngineNotification::ConnectionLost { cause } => inner.on_connection_lost(cause),
        }
    }
}
