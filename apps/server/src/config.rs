//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = probe 8000-8010).
    /// Override: `SYNCDECK_BIND_PORT`
    pub bind_port: u16,

    /// Directory holding the media library.
    /// Override: `SYNCDECK_MEDIA_ROOT` (or the legacy `VIDEO_PATH`)
    pub media_root: PathBuf,

    /// Player executable.
    /// Override: `SYNCDECK_PLAYER_BINARY`
    pub player_binary: PathBuf,

    /// Extra arguments placed before the fixed player arguments.
    pub player_extra_args: Vec<String>,

    /// File extensions listed in the catalog.
    pub media_extensions: Vec<String>,

    /// Browser origins allowed to call the API (empty = any).
    pub trusted_origins: Vec<String>,

    /// Timeout for one command write to the player, in milliseconds.
    pub command_timeout_ms: u64,

    /// Grace period between SIGTERM and kill when stopping the player, in milliseconds.
    pub stop_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = syncdeck_core::Config::default();
        Self {
            bind_port: core.preferred_port,
            media_root: core.media_root,
            player_binary: core.player_binary,
            player_extra_args: core.player_extra_args,
            media_extensions: core.media_extensions,
            trusted_origins: core.trusted_origins,
            command_timeout_ms: core.command_timeout_ms,
            stop_grace_ms: core.stop_grace_ms,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Note: `SYNCDECK_BIND_PORT`, `SYNCDECK_MEDIA_ROOT` and
    /// `SYNCDECK_PLAYER_BINARY` are also read by clap in main.rs; the lookup
    /// here covers the legacy `VIDEO_PATH` and runs without CLI parsing.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("SYNCDECK_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(root) = var("SYNCDECK_MEDIA_ROOT").or_else(|| var("VIDEO_PATH")) {
            if !root.is_empty() {
                self.media_root = PathBuf::from(root);
            }
        }

        if let Some(binary) = var("SYNCDECK_PLAYER_BINARY") {
            if !binary.is_empty() {
                self.player_binary = PathBuf::from(binary);
            }
        }
    }

    /// Converts to syncdeck-core's Config type.
    pub fn to_core_config(&self) -> syncdeck_core::Config {
        syncdeck_core::Config {
            preferred_port: self.bind_port,
            media_root: self.media_root.clone(),
            player_binary: self.player_binary.clone(),
            player_extra_args: self.player_extra_args.clone(),
            media_extensions: self.media_extensions.clone(),
            trusted_origins: self.trusted_origins.clone(),
            command_timeout_ms: self.command_timeout_ms,
            stop_grace_ms: self.stop_grace_ms,
            ..Default::default()
        }
    }
}
