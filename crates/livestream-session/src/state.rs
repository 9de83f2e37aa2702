//! Session state owned by the coordinator.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, error};

use livestream_ipc::{
    CameraFacing, OfflineReason, ParticipantId, ParticipantStatus, PublishSource, PublishState,
    Role, SessionConfig, SessionPhase, SessionSnapshot,
};

use crate::engine::SessionHandle;

/// Mutable state of one channel membership.
///
/// Only the coordinator touches this, always under its state lock.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: SessionPhase,
    pub(crate) config: Option<SessionConfig>,
    pub(crate) handle: Option<SessionHandle>,
    local_id: Option<ParticipantId>,
    pub(crate) audio_muted: bool,
    pub(crate) video_muted: bool,
    pub(crate) camera: CameraFacing,
    sources: BTreeSet<PublishSource>,
    participants: HashMap<ParticipantId, ParticipantStatus>,

    /// Leave requested while the join was still pending.
    pub(crate) leave_after_join: bool,
}

impl SessionState {
    /// Create the state of a fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    /// Apply a phase transition.
    ///
    /// Returns the previous phase, or `None` if the edge is not part of the
    /// lifecycle (nothing changes in that case).
    pub(crate) fn advance(&mut self, next: SessionPhase) -> Option<SessionPhase> {
        let previous = self.phase;
        if !previous.can_transition_to(next) {
            error!(%previous, %next, "Rejected illegal phase transition");
            return None;
        }
        self.phase = next;
        Some(previous)
    }

    /// Record the assigned id and seed publish state from the config.
    pub(crate) fn enter_joined(&mut self, local_id: ParticipantId) {
        self.local_id = Some(local_id);
        self.audio_muted = false;
        self.video_muted = false;
        self.camera = CameraFacing::Front;
        self.sources.clear();
        self.participants.clear();

        if let Some(config) = self.config.as_ref().filter(|c| c.role == Role::Broadcaster) {
            if config.publish.audio {
                self.sources.insert(PublishSource::Microphone);
            }
            if config.publish.video {
                self.sources.insert(PublishSource::Camera);
            }
            if config.publish.screen {
                self.sources.insert(PublishSource::Screen);
            }
        }
    }

    /// Drop everything that is only meaningful while joined.
    pub(crate) fn clear_media(&mut self) {
        self.audio_muted = false;
        self.video_muted = false;
        self.camera = CameraFacing::Front;
        self.sources.clear();
        self.participants.clear();
    }

    pub(crate) fn set_source(&mut self, source: PublishSource, active: bool) {
        if active {
            self.sources.insert(source);
        } else {
            self.sources.remove(&source);
        }
    }

    pub fn is_publishing(&self, source: PublishSource) -> bool {
        self.sources.contains(&source)
    }

    /// Mark a participant online. Returns false if it already was.
    pub(crate) fn participant_joined(&mut self, id: ParticipantId) -> bool {
        let previous = self.participants.insert(id, ParticipantStatus::Online);
        !previous.is_some_and(|status| status.is_online())
    }

    /// Mark a known online participant offline.
    ///
    /// Unknown ids and repeated leaves change nothing and return `None`.
    pub(crate) fn participant_left(
        &mut self,
        id: ParticipantId,
        reason: OfflineReason,
    ) -> Option<ParticipantStatus> {
        match self.participants.get_mut(&id) {
            Some(status @ ParticipantStatus::Online) => {
                *status = ParticipantStatus::Offline { reason };
                Some(*status)
            }
            Some(_) => {
                debug!(%id, "Participant already offline");
                None
            }
            None => {
                debug!(%id, "Leave for unknown participant");
                None
            }
        }
    }

    /// Current publish state.
    pub fn publish_state(&self) -> PublishState {
        PublishState {
            audio_muted: self.audio_muted,
            video_muted: self.video_muted,
            sources: self.sources.iter().copied().collect(),
            camera: self.camera,
        }
    }

    /// Serializable copy of the state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            local_id: self.local_id,
            publish: self.publish_state(),
            participants: self.participants.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}
