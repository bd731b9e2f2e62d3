//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for the session engine to emit events
//! - [`BroadcastEventBridge`] for WebSocket/SSE transport
//! - Event types for session lifecycle and player output

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::session::SessionState;

/// Events broadcast to clients.
///
/// Each category has its own inner event type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Session lifecycle and status messages.
    Session(SessionEvent),

    /// A line printed by the external player.
    Output(OutputEvent),
}

impl BroadcastEvent {
    /// Returns the category name used as the SSE event name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Output(_) => "output",
        }
    }
}

/// Events related to session state changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session state machine moved to a new state.
    StateChanged {
        /// The state that was entered.
        state: SessionState,
        /// The session the transition belongs to.
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<u64>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Human-readable progress or failure message.
    Status {
        /// Display text.
        message: String,
        /// Machine-readable code for failures.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// One line of output read from the external player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    /// The line, without its terminator.
    pub data: String,
    /// The session whose process produced the line.
    #[serde(rename = "sessionId")]
    pub session_id: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<OutputEvent> for BroadcastEvent {
    fn from(event: OutputEvent) -> Self {
        BroadcastEvent::Output(event)
    }
}
