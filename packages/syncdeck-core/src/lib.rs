//! SyncDeck Core - drives a synchronized-playback client from the browser.
//!
//! The server owns one external player process at a time, relays everything
//! it prints to connected clients and forwards playback and chat commands to
//! its stdin. It is used by the standalone server binary and can be embedded
//! by other hosts.
//!
//! # Architecture
//!
//! - [`session`]: launcher, output relay, command dispatcher and the session manager
//! - [`events`]: event system for real-time client communication
//! - [`catalog`]: media listing under the configured root
//! - [`api`]: HTTP, SSE and WebSocket surface
//! - [`bootstrap`]: service wiring
//! - [`state`]: configuration
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`ProcessSpawner`](session::ProcessSpawner): starting the player with piped I/O
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod session;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use catalog::MediaCatalog;
pub use error::{ErrorCode, SyncDeckError, SyncDeckResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter,
    OutputEvent, SessionEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{
    Command, DispatchError, LaunchError, ProcessSpawner, SessionHandle, SessionInfo,
    SessionManager, SessionRequest, SessionState, StartError, StopError, TokioProcessSpawner,
};
pub use state::Config;
pub use utils::now_millis;

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_services_with_spawner, BootstrappedServices};

// Re-export API types
pub use api::{bind_listener, start_server, AppState, ServerError, WsConnectionManager};
