//! Session lifecycle for the external playback client.
//!
//! - [`launcher`]: resolves the media path and spawns the player with piped I/O
//! - [`relay`]: drains the player's output into [`OutputEvent`](crate::events::OutputEvent)s
//! - [`dispatcher`]: encodes [`Command`]s onto the player's stdin
//! - [`manager`]: owns the single session and its state machine

mod dispatcher;
mod launcher;
mod manager;
mod relay;
#[cfg(test)]
pub(crate) mod test_fixtures;

pub use dispatcher::{Command, CommandDispatcher, DispatchError, PlaybackAction, PlaybackActionKind};
pub use launcher::{
    build_player_args, resolve_media_path, InputSink, LaunchError, LaunchedProcess, OutputLines,
    ProcessControl, ProcessLauncher, ProcessSpawner, TokioProcessSpawner,
};
pub use manager::{SessionManager, StartError, StopError};
pub use relay::{RelayEnd, RelayExit};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the (single) session.
///
/// `Idle → Starting → Running → Stopping → Idle`; a failed launch goes
/// straight from `Starting` back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Parameters for joining a room with a local media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Sync server address (`host` or `host:port`).
    pub server: String,
    /// Room to join.
    pub room: String,
    /// Participant name shown to other viewers.
    pub username: String,
    /// Media path relative to the configured media root.
    #[serde(rename = "videoPath", alias = "mediaPath")]
    pub media_path: String,
}

impl SessionRequest {
    /// Checks that every field is present and usable as a player argument.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("server", &self.server),
            ("room", &self.room),
            ("username", &self.username),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field));
            }
            // Would be parsed by the player as another option.
            if value.starts_with('-') {
                return Err(format!("{} must not start with '-'", field));
            }
        }
        if self.media_path.trim().is_empty() {
            return Err("videoPath must not be empty".to_string());
        }
        Ok(())
    }
}

/// Details of a started session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    /// Monotonic id, unique per server process.
    pub session_id: u64,
    /// OS process id of the player, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub server: String,
    pub room: String,
    pub username: String,
    /// Absolute, resolved media path handed to the player.
    pub media_path: PathBuf,
    /// Unix timestamp in milliseconds.
    pub started_at: u64,
}

/// Read-only snapshot of the session manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
}
