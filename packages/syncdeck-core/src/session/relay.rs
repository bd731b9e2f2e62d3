//! Output relay: drains the player's output for the lifetime of the process.

use std::sync::Arc;

use futures::StreamExt;

use super::launcher::OutputLines;
use crate::events::{EventEmitter, OutputEvent};
use crate::utils::now_millis;

/// Why the relay stopped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The output stream closed (process exited or closed its pipes).
    EndOfStream,
    /// Reading failed; treated the same as the process exiting.
    ReadError(String),
}

/// Summary handed to the session manager when the relay finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayExit {
    pub session_id: u64,
    pub lines: u64,
    pub end: RelayEnd,
}

/// Publishes every output line in read order until the stream ends.
///
/// Emitting never waits on subscribers, so a slow or absent client cannot
/// hold up the read loop.
pub(crate) async fn run_output_relay(
    session_id: u64,
    mut output: OutputLines,
    emitter: Arc<dyn EventEmitter>,
) -> RelayExit {
    log::debug!("[Relay] Started for session {}", session_id);
    let mut lines = 0u64;

    let end = loop {
        match output.next().await {
            Some(Ok(line)) => {
                let data = line.trim().to_string();
                log::debug!("[Relay] Player: {}", data);
                lines += 1;
                emitter.emit_output(OutputEvent {
                    data,
                    session_id,
                    timestamp: now_millis(),
                });
            }
            Some(Err(e)) => {
                log::warn!("[Relay] Read error on session {}: {}", session_id, e);
                break RelayEnd::ReadError(e.to_string());
            }
            None => break RelayEnd::EndOfStream,
        }
    };

    log::info!(
        "[Relay] Session {} output closed after {} line(s)",
        session_id,
        lines
    );
    RelayExit {
        session_id,
        lines,
        end,
    }
}
