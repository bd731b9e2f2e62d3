//! WebSocket connection tracking.
//!
//! - `WsConnectionManager`: every open socket, with the session it started (if any)
//! - `ConnectionGuard`: RAII registration that unregisters on drop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::utils::now_millis;

struct ConnectionState {
    connected_at: u64,
    /// Session this socket started and will stop on close.
    owned_session: Option<u64>,
}

/// Tracks open WebSocket connections and can force-close all of them.
///
/// Each connection gets a child of one global cancellation token, so
/// [`close_all`](Self::close_all) reaches every handler at once.
pub struct WsConnectionManager {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Replaced with a fresh token after `close_all()`.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection; it is unregistered when the guard drops.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = format!("ws-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            id.clone(),
            ConnectionState {
                connected_at: now_millis(),
                owned_session: None,
            },
        );
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            id,
            self.connections.len()
        );

        ConnectionGuard {
            id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            log::info!(
                "[WS] Connection unregistered: {} after {} ms (remaining: {})",
                id,
                now_millis().saturating_sub(state.connected_at),
                self.connections.len()
            );
        }
    }

    fn set_owned_session(&self, id: &str, session_id: Option<u64>) {
        if let Some(mut state) = self.connections.get_mut(id) {
            state.owned_session = session_id;
        }
    }

    /// Returns the connection that started `session_id`, if it is still open.
    pub fn owner_of(&self, session_id: u64) -> Option<String> {
        self.connections
            .iter()
            .find(|entry| entry.owned_session == Some(session_id))
            .map(|entry| entry.key().clone())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Signals every open connection to close.
    ///
    /// New connections are still accepted afterwards. Returns how many
    /// connections were signalled.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration of one connection; unregisters on drop, even if the
/// handler exits early.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the server force-closes connections.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Records which session this connection owns (`None` to release it).
    pub fn set_owned_session(&self, session_id: Option<u64>) {
        self.manager.set_owned_session(&self.id, session_id);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_unregister_on_drop() {
        let manager = Arc::new(WsConnectionManager::new());
        let a = manager.register();
        let b = manager.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.connection_count(), 2);

        drop(a);
        assert_eq!(manager.connection_count(), 1);
    }

    #[test]
    fn close_all_cancels_existing_connections_only() {
        let manager = Arc::new(WsConnectionManager::new());
        let old = manager.register();

        assert_eq!(manager.close_all(), 1);
        assert!(old.cancel_token().is_cancelled());

        let new = manager.register();
        assert!(!new.cancel_token().is_cancelled());
    }

    #[test]
    fn session_ownership_is_tracked_per_connection() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();

        guard.set_owned_session(Some(3));
        assert_eq!(manager.owner_of(3).as_deref(), Some(guard.id()));

        guard.set_owned_session(None);
        assert!(manager.owner_of(3).is_none());

        guard.set_owned_session(Some(4));
        drop(guard);
        assert!(manager.owner_of(4).is_none());
    }
}
