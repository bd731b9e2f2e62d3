//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where the session
//! engine, the event bus and the API-facing services are created and wired
//! together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::WsConnectionManager;
use crate::catalog::MediaCatalog;
use crate::error::{SyncDeckError, SyncDeckResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter};
use crate::runtime::TokioSpawner;
use crate::session::{ProcessSpawner, SessionManager, TokioProcessSpawner};
use crate::state::Config;

/// Container for all bootstrapped services.
///
/// Consumed by [`AppState`](crate::api::AppState) to build the handler state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Owns the single player session.
    pub session_manager: Arc<SessionManager>,
    /// Lists media under the configured root.
    pub catalog: Arc<MediaCatalog>,
    /// Event bridge feeding WebSocket and SSE clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Reapers of terminated players; empty when the spawner is injected.
    pub reapers: TaskTracker,
    /// Cancelled on shutdown; the HTTP server stops accepting when it fires.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Stops the active session and closes every WebSocket.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();
        self.session_manager.shutdown();

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        log::info!("[Bootstrap] Shutdown complete");
    }

    /// Waits up to `limit` for terminated players to be reaped.
    ///
    /// Call after [`shutdown`](Self::shutdown) and before the runtime is
    /// dropped, otherwise a player still inside its grace period is killed
    /// outright. Returns whether every reaper finished in time.
    pub async fn wait_for_players(&self, limit: Duration) -> bool {
        self.reapers.close();
        if tokio::time::timeout(limit, self.reapers.wait()).await.is_ok() {
            return true;
        }
        log::warn!(
            "[Bootstrap] {} player(s) still exiting after {:?}",
            self.reapers.len(),
            limit
        );
        false
    }
}

/// Bootstraps all services, spawning the real player binary.
///
/// # Errors
///
/// Returns a configuration error if `config` fails validation.
pub fn bootstrap_services(
    config: &Config,
    handle: tokio::runtime::Handle,
) -> SyncDeckResult<BootstrappedServices> {
    let process_spawner = TokioProcessSpawner::new();
    let reapers = process_spawner.reapers();
    wire_services(config, handle, Arc::new(process_spawner), reapers)
}

/// Bootstraps all services with a custom process spawner.
///
/// Wiring order:
///
/// 1. Broadcast channel and event bridge (with a logging side channel)
/// 2. Session manager (depends on the bridge and the process spawner)
/// 3. Catalog and WebSocket connection manager
pub fn bootstrap_services_with_spawner(
    config: &Config,
    handle: tokio::runtime::Handle,
    process_spawner: Arc<dyn ProcessSpawner>,
) -> SyncDeckResult<BootstrappedServices> {
    wire_services(config, handle, process_spawner, TaskTracker::new())
}

fn wire_services(
    config: &Config,
    handle: tokio::runtime::Handle,
    process_spawner: Arc<dyn ProcessSpawner>,
    reapers: TaskTracker,
) -> SyncDeckResult<BootstrappedServices> {
    config.validate().map_err(SyncDeckError::Configuration)?;

    let spawner = TokioSpawner::new(handle);

    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(config.event_channel_capacity);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx));
    event_bridge.set_external_emitter(Arc::new(LoggingEventEmitter));

    let session_manager = Arc::new(SessionManager::new(
        config,
        process_spawner,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner,
    ));

    log::info!(
        "[Bootstrap] Player: {}, media root: {}",
        config.player_binary.display(),
        config.media_root.display()
    );

    Ok(BootstrappedServices {
        session_manager,
        catalog: Arc::new(MediaCatalog::from_config(config)),
        event_bridge,
        ws_manager: Arc::new(WsConnectionManager::new()),
        reapers,
        cancel_token: CancellationToken::new(),
    })
}
