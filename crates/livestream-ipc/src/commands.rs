//! Commands sent from the caller to a session driver.

use serde::{Deserialize, Serialize};

use crate::types::SessionConfig;

/// Commands that a caller can send to a session driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Store the configuration used by the next join.
    Configure { config: SessionConfig },

    /// Join the configured channel.
    Join,

    /// Leave the channel.
    Leave,

    /// Change local mute and screen-share state.
    UpdatePublishState {
        audio_muted: bool,
        video_muted: bool,
        screen_share_active: bool,
    },

    /// Switch between front and back camera.
    SwitchCamera,

    /// Request a snapshot of the session state.
    GetState,

    /// Leave and stop the driver.
    Shutdown,
}

impl SessionCommand {
    /// Returns the display name for this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configure { .. } => "configure",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::UpdatePublishState { .. } => "update_publish_state",
            Self::SwitchCamera => "switch_camera",
            Self::GetState => "get_state",
            Self::Shutdown => "shutdown",
        }
    }
}
