//! Command encoding and delivery to the player's stdin.
//!
//! Every command is one line. The line is written and flushed while holding
//! the input lock, so concurrent senders never interleave bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::launcher::InputSink;
use crate::protocol_constants::{CMD_PAUSE, CMD_PLAY, CMD_SEEK_PREFIX, COMMAND_TERMINATOR};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No active session")]
    NoActiveSession,
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Player is no longer running: {0}")]
    ProcessGone(String),
    #[error("Timed out writing to player")]
    WriteTimeout,
}

/// A playback or chat intent for the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    /// Seek to a position in whole seconds.
    SeekTo(u64),
    /// Chat text, sent as a raw line.
    Chat(String),
}

impl Command {
    /// Builds a chat command, rejecting text the protocol cannot carry.
    pub fn chat(text: impl Into<String>) -> Result<Self, DispatchError> {
        let text = text.into();
        validate_chat(&text)?;
        Ok(Self::Chat(text))
    }

    /// Builds a seek command from a JSON number.
    ///
    /// Accepts non-negative integers (including integral floats like `42.0`);
    /// negative or fractional positions are rejected.
    pub fn seek_to(position: &serde_json::Number) -> Result<Self, DispatchError> {
        if let Some(secs) = position.as_u64() {
            return Ok(Self::SeekTo(secs));
        }
        if position.is_i64() {
            return Err(DispatchError::InvalidCommand(format!(
                "seek position must not be negative: {}",
                position
            )));
        }
        match position.as_f64() {
            Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                Ok(Self::SeekTo(f as u64))
            }
            _ => Err(DispatchError::InvalidCommand(format!(
                "seek position must be a non-negative integer: {}",
                position
            ))),
        }
    }

    /// Encodes the command as a protocol line, terminator included.
    pub fn encode(&self) -> Result<String, DispatchError> {
        let mut line = match self {
            Self::Pause => CMD_PAUSE.to_string(),
            Self::Play => CMD_PLAY.to_string(),
            Self::SeekTo(secs) => format!("{} {}", CMD_SEEK_PREFIX, secs),
            Self::Chat(text) => {
                validate_chat(text)?;
                text.clone()
            }
        };
        line.push(COMMAND_TERMINATOR);
        Ok(line)
    }
}

/// Chat must be a single non-empty line; an embedded newline would let the
/// text smuggle extra control commands.
fn validate_chat(text: &str) -> Result<(), DispatchError> {
    if text.trim().is_empty() {
        return Err(DispatchError::InvalidCommand(
            "chat message must not be empty".into(),
        ));
    }
    if text.contains(['\n', '\r']) {
        return Err(DispatchError::InvalidCommand(
            "chat message must be a single line".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackActionKind {
    Play,
    Pause,
    Seek,
}

/// Playback request as sent by clients: `{action, position?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackAction {
    pub action: PlaybackActionKind,
    #[serde(default)]
    pub position: Option<serde_json::Number>,
}

impl PlaybackAction {
    pub fn into_command(self) -> Result<Command, DispatchError> {
        match self.action {
            PlaybackActionKind::Play => Ok(Command::Play),
            PlaybackActionKind::Pause => Ok(Command::Pause),
            PlaybackActionKind::Seek => {
                let position = self.position.ok_or_else(|| {
                    DispatchError::InvalidCommand("seek requires a position".into())
                })?;
                Command::seek_to(&position)
            }
        }
    }
}

/// Serialized writer for the player's stdin.
///
/// A write that times out may already have pushed part of its line into the
/// pipe. From then on the input stream is unusable and every later send
/// fails with `ProcessGone` without writing.
pub struct CommandDispatcher {
    input: Mutex<InputSink>,
    write_timeout: Option<Duration>,
    broken: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(input: InputSink, write_timeout: Option<Duration>) -> Self {
        Self {
            input: Mutex::new(input),
            write_timeout,
            broken: AtomicBool::new(false),
        }
    }

    /// Writes one command line and flushes it.
    ///
    /// Invalid commands are rejected before anything is written. A failed
    /// write means the pipe is closed and is reported as `ProcessGone`.
    pub async fn send(&self, command: &Command) -> Result<(), DispatchError> {
        let line = command.encode()?;

        let mut input = self.input.lock().await;
        if self.broken.load(Ordering::Acquire) {
            return Err(DispatchError::ProcessGone(
                "input stream was cut off mid-command".into(),
            ));
        }
        let write = async {
            input.write_all(line.as_bytes()).await?;
            input.flush().await
        };
        let result = match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => {
                    self.broken.store(true, Ordering::Release);
                    log::warn!("[Dispatch] Write to player timed out after {:?}", limit);
                    return Err(DispatchError::WriteTimeout);
                }
            },
            None => write.await,
        };

        result.map_err(|e| {
            self.broken.store(true, Ordering::Release);
            log::warn!("[Dispatch] Write to player failed: {}", e);
            DispatchError::ProcessGone(e.to_string())
        })?;
        log::debug!("[Dispatch] Sent {:?}", command);
        Ok(())
    }
}
