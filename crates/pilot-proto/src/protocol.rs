use serde::{Deserialize, Serialize};

/// Discrete playback state as seen by clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Snapshot of the controller, returned by every API call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Status {
    /// Item relative to the media root; empty when idle.
    pub playing: String,
    pub paused: bool,
    pub state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Last failure of the HDMI-CEC link, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_error: Option<String>,
}

impl Status {
    pub fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRequest {
    /// Empty means "resume whatever is paused".
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekRequest {
    pub milliseconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub num_files: usize,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
