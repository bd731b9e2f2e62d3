//! Event emitter abstraction for decoupling the session engine from transport.
//!
//! The session manager and output relay depend on the [`EventEmitter`] trait
//! rather than concrete broadcast channels, enabling testing and alternative
//! transport implementations.

use super::{OutputEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn announce(&self) {
///         self.emitter.emit_session(SessionEvent::Status { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle or status event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits one line of player output.
    fn emit_output(&self, event: OutputEvent);
}

/// No-op emitter for testing or embedding.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_output(&self, _event: OutputEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_output(&self, event: OutputEvent) {
        tracing::debug!(?event, "output_event");
    }
}
