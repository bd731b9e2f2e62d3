//! Core configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::PORT_RANGE_START;

/// Configuration for the SyncDeck core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = probe the default range).
    pub preferred_port: u16,

    /// Origins allowed to call the API from a browser (prefix match).
    /// Empty allows any origin.
    pub trusted_origins: Vec<String>,

    // Media
    /// Root directory under which media files are discovered and resolved.
    pub media_root: PathBuf,

    /// File extensions (without dot, case-insensitive) listed by the catalog.
    pub media_extensions: Vec<String>,

    // Player
    /// External playback client executable (name on PATH or absolute path).
    pub player_binary: PathBuf,

    /// Extra arguments placed before the fixed player arguments.
    pub player_extra_args: Vec<String>,

    /// Timeout for a single command write to the player (milliseconds, 0 = none).
    pub command_timeout_ms: u64,

    /// Time the player gets to exit after SIGTERM before it is killed (milliseconds).
    pub stop_grace_ms: u64,

    // Events
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: PORT_RANGE_START,
            trusted_origins: Vec::new(),
            media_root: PathBuf::from("/app/videos"),
            media_extensions: ["mp4", "mkv", "avi", "webm", "mov"]
                .into_iter()
                .map(String::from)
                .collect(),
            player_binary: PathBuf::from("syncplay"),
            player_extra_args: Vec::new(),
            command_timeout_ms: 2000,
            stop_grace_ms: 3000,
            event_channel_capacity: 256,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.player_binary.as_os_str().is_empty() {
            return Err("player_binary must not be empty".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.media_extensions.is_empty() {
            return Err("media_extensions must list at least one extension".to_string());
        }
        Ok(())
    }
}
