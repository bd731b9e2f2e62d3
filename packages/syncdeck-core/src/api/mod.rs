//! HTTP/WebSocket API layer.
//!
//! Handlers are thin: they translate requests into [`SessionManager`] calls
//! and errors into responses. Router construction and server startup live
//! here too.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrappedServices;
use crate::catalog::MediaCatalog;
use crate::error::{SyncDeckError, SyncDeckResult};
use crate::events::BroadcastEventBridge;
use crate::protocol_constants::{PORT_RANGE_END, PORT_RANGE_START};
use crate::session::{SessionHandle, SessionManager, SessionRequest};
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session_manager: Arc<SessionManager>,
    pub catalog: Arc<MediaCatalog>,
    /// Source of the event stream forwarded to WebSocket and SSE clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(services: &BootstrappedServices, config: Arc<Config>) -> Self {
        Self {
            session_manager: Arc::clone(&services.session_manager),
            catalog: Arc::clone(&services.catalog),
            event_bridge: Arc::clone(&services.event_bridge),
            ws_manager: Arc::clone(&services.ws_manager),
            config,
        }
    }

    /// Starts a session off the async executor.
    ///
    /// Spawning the player is a blocking syscall and the manager's start
    /// path is synchronous, so it runs on the blocking pool.
    pub async fn start_session(&self, request: SessionRequest) -> SyncDeckResult<SessionHandle> {
        let manager = Arc::clone(&self.session_manager);
        let handle = tokio::task::spawn_blocking(move || manager.start(request))
            .await
            .map_err(|e| SyncDeckError::Internal(format!("start task failed: {}", e)))??;
        Ok(handle)
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the preferred port, or probes the default range when it is `0`.
pub async fn bind_listener(preferred_port: u16) -> Result<(u16, TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, TcpListener::bind(&addr).await?))
    } else {
        find_available_port(PORT_RANGE_START, PORT_RANGE_END).await
    }
}

/// Runs the HTTP server until `shutdown` is cancelled.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let (port, listener) = bind_listener(state.config.preferred_port).await?;

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn occupied_range_reports_no_available_port() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = find_available_port(port, port).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::NoAvailablePort { start, end } if start == port && end == port
        ));
    }

    #[tokio::test]
    async fn explicit_port_is_bound_as_is() {
        let probe = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (bound, listener) = bind_listener(port).await.unwrap();
        assert_eq!(bound, port);
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
