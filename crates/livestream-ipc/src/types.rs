//! Common types used across session messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{ParticipantStatus, SessionPhase};

/// Longest channel name the engine accepts, in bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Bounding box used when sizing a screen-share stream.
pub const SCREEN_SHARE_BOUNDS: (u32, u32) = (540, 960);

/// Identifier of a participant in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Opaque error reported by the media engine.
///
/// The code and message are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    /// Engine-specific error code.
    pub code: i32,

    /// Engine-supplied description.
    pub message: String,
}

impl EngineError {
    /// Create a new engine error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Role of the local participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Publishes local media into the channel.
    #[default]
    Broadcaster,

    /// Only receives media.
    Audience,
}

/// Audience latency tier requested from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyTier {
    /// Low latency (default).
    #[default]
    Low,

    /// Ultra-low latency.
    UltraLow,
}

/// Channel credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Application identifier issued by the engine vendor.
    pub app_id: String,

    /// Channel to join.
    pub channel: String,

    /// Access token (may be empty for test projects).
    pub token: String,
}

/// Which local sources are published on join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishFlags {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

impl PublishFlags {
    /// Returns true if nothing is published.
    pub fn is_empty(&self) -> bool {
        !(self.audio || self.video || self.screen)
    }
}

/// Encoder hints passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderHints {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target frame rate.
    pub frame_rate: u32,

    /// Target bitrate in kbps (None for the engine's standard bitrate).
    pub bitrate_kbps: Option<u32>,
}

impl Default for EncoderHints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            frame_rate: 15,
            bitrate_kbps: None,
        }
    }
}

/// Parameters for a screen-share track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenShareParams {
    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Target frame rate.
    pub frame_rate: u32,

    /// Target bitrate in kbps (None for the engine's standard bitrate).
    pub bitrate_kbps: Option<u32>,

    /// Also capture application audio.
    pub capture_audio: bool,
}

impl Default for ScreenShareParams {
    fn default() -> Self {
        Self {
            width: SCREEN_SHARE_BOUNDS.0,
            height: SCREEN_SHARE_BOUNDS.1,
            frame_rate: 30,
            bitrate_kbps: None,
            capture_audio: true,
        }
    }
}

impl ScreenShareParams {
    /// Size the share to the screen's aspect ratio within the default bounds.
    ///
    /// The axis with the smaller bound-to-screen ratio keeps its bound and
    /// the other axis is derived from the screen's aspect ratio.
    pub fn fit_to_screen(screen_width: u32, screen_height: u32) -> Self {
        let (mut width, mut height) = (SCREEN_SHARE_BOUNDS.0 as f64, SCREEN_SHARE_BOUNDS.1 as f64);

        if screen_width > 0 && screen_height > 0 {
            let (sw, sh) = (screen_width as f64, screen_height as f64);
            let scale_w = width / sw;
            let scale_h = height / sh;

            if scale_h < scale_w {
                width = height / sh * sw;
            } else if scale_w < scale_h {
                height = width / sw * sh;
            }
        }

        Self {
            width: width.round() as u32,
            height: height.round() as u32,
            ..Self::default()
        }
    }
}

/// Configuration for one channel membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Credentials for the channel.
    pub credentials: Credentials,

    /// Local role.
    pub role: Role,

    /// Sources published on join.
    pub publish: PublishFlags,

    /// Camera encoder hints.
    pub encoder: EncoderHints,

    /// Requested latency tier.
    pub latency: LatencyTier,

    /// Requested local id (None lets the engine assign one).
    pub requested_id: Option<ParticipantId>,

    /// Subscribe to remote audio automatically.
    pub auto_subscribe_audio: bool,

    /// Subscribe to remote video automatically.
    pub auto_subscribe_video: bool,

    /// Parameters used when screen share is toggled on.
    pub screen_share: ScreenShareParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            role: Role::Broadcaster,
            publish: PublishFlags::default(),
            encoder: EncoderHints::default(),
            latency: LatencyTier::default(),
            requested_id: None,
            auto_subscribe_audio: true,
            auto_subscribe_video: true,
            screen_share: ScreenShareParams::default(),
        }
    }
}

impl SessionConfig {
    /// Broadcaster publishing camera and microphone.
    pub fn broadcaster(
        app_id: impl Into<String>,
        channel: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            credentials: Credentials {
                app_id: app_id.into(),
                channel: channel.into(),
                token: token.into(),
            },
            role: Role::Broadcaster,
            publish: PublishFlags {
                audio: true,
                video: true,
                screen: false,
            },
            ..Self::default()
        }
    }

    /// Audience member publishing nothing.
    pub fn audience(
        app_id: impl Into<String>,
        channel: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            credentials: Credentials {
                app_id: app_id.into(),
                channel: channel.into(),
                token: token.into(),
            },
            role: Role::Audience,
            ..Self::default()
        }
    }

    pub fn with_publish(mut self, publish: PublishFlags) -> Self {
        self.publish = publish;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderHints) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_latency(mut self, latency: LatencyTier) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_requested_id(mut self, id: ParticipantId) -> Self {
        self.requested_id = Some(id);
        self
    }

    pub fn with_screen_share(mut self, params: ScreenShareParams) -> Self {
        self.screen_share = params;
        self
    }

    /// Check the config for values the engine would reject.
    pub fn validate(&self) -> Result<(), String> {
        let channel = &self.credentials.channel;
        if channel.is_empty() {
            return Err("channel name is empty".to_string());
        }
        if channel.len() > MAX_CHANNEL_NAME_LEN {
            return Err(format!(
                "channel name is {} bytes, limit is {}",
                channel.len(),
                MAX_CHANNEL_NAME_LEN
            ));
        }
        if self.role == Role::Audience && !self.publish.is_empty() {
            return Err("audience role cannot publish local media".to_string());
        }
        Ok(())
    }
}

/// A local media track that can be muted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Audio,
    Video,
}

/// A local source that can be published into the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishSource {
    Camera,
    Microphone,
    Screen,
}

/// Which physical camera is capturing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    /// The other camera.
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// Local publish state while joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishState {
    /// Microphone track muted.
    pub audio_muted: bool,

    /// Camera track muted.
    pub video_muted: bool,

    /// Sources currently published.
    pub sources: Vec<PublishSource>,

    /// Active camera.
    pub camera: CameraFacing,
}

impl PublishState {
    /// Returns true if the given source is published.
    pub fn is_publishing(&self, source: PublishSource) -> bool {
        self.sources.contains(&source)
    }
}

/// Engine call that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOperation {
    CreateSession,
    Join,
    Leave,
    SetMuted(Track),
    SwitchCamera,
    StartScreenShare,
    StopScreenShare,
}

impl EngineOperation {
    /// Returns the display name for this operation.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateSession => "create_session",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::SetMuted(Track::Audio) => "mute_audio",
            Self::SetMuted(Track::Video) => "mute_video",
            Self::SwitchCamera => "switch_camera",
            Self::StartScreenShare => "start_screen_share",
            Self::StopScreenShare => "stop_screen_share",
        }
    }
}

/// Channel statistics reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Time in the channel, in seconds.
    pub duration_secs: u64,

    /// Outgoing bitrate in kbps.
    pub tx_kbps: u32,

    /// Incoming bitrate in kbps.
    pub rx_kbps: u32,

    /// Round-trip time to the edge server in milliseconds.
    pub rtt_ms: u32,

    /// Outgoing packet loss percentage (0-100).
    pub tx_packet_loss_percent: f32,

    /// Incoming packet loss percentage (0-100).
    pub rx_packet_loss_percent: f32,

    /// Participants in the channel, including the local one.
    pub user_count: u32,
}

/// Types of quality warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QualityWarning {
    /// Packet loss above threshold.
    HighPacketLoss { percent: f32 },

    /// Round-trip time above threshold.
    HighLatency { rtt_ms: u32 },

    /// Raw warning code from the engine.
    EngineWarning { code: i32 },
}

/// Read-only copy of the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,

    /// Id assigned by the engine, once joined.
    pub local_id: Option<ParticipantId>,

    /// Local publish state (meaningful only while joined).
    pub publish: PublishState,

    /// Last-known status of every remote participant seen.
    pub participants: BTreeMap<ParticipantId, ParticipantStatus>,
}
