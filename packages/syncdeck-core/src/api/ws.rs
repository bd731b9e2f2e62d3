//! WebSocket handler for browser clients.
//!
//! A socket receives every broadcast event plus direct replies to its own
//! requests. The socket that starts a session owns it: when that socket
//! goes away, the session is stopped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::ws_connection::ConnectionGuard;
use crate::api::AppState;
use crate::error::SyncDeckError;
use crate::protocol_constants::{
    WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS, WS_PING_AFTER_SECS,
};
use crate::session::{
    Command, PlaybackAction, SessionHandle, SessionInfo, SessionManager, SessionRequest,
};

// ─────────────────────────────────────────────────────────────────────────────
// Session Guard (RAII cleanup)
// ─────────────────────────────────────────────────────────────────────────────

/// Stops the session this socket started when dropped.
///
/// Only the owned session id is stopped, so a guard that outlives its
/// session never touches a newer one.
struct SessionGuard {
    session_id: u64,
    session_manager: Arc<SessionManager>,
}

impl SessionGuard {
    fn new(session_id: u64, session_manager: Arc<SessionManager>) -> Self {
        Self {
            session_id,
            session_manager,
        }
    }

    fn id(&self) -> u64 {
        self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self
            .session_manager
            .stop_session(self.session_id, "Client disconnected.")
        {
            log::info!("[WS] Session {} stopped on disconnect", self.session_id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    ConnectSyncplay { payload: SessionRequest },
    PlaybackAction { payload: PlaybackAction },
    ChatMessage { payload: ChatPayload },
    Disconnect,
    Heartbeat,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    message: String,
}

/// Outgoing WebSocket messages.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    /// Reply to a request of this socket (usually a failure).
    Status {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
    },
    SessionStarted {
        payload: SessionHandle,
    },
    InitialState {
        payload: SessionInfo,
    },
    HeartbeatAck,
}

impl WsOutgoing {
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }

    fn error(err: &SyncDeckError) -> Self {
        Self::Status {
            message: err.to_string(),
            code: Some(err.code()),
        }
    }
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send(sender: &mut WsSender, msg: WsOutgoing) -> bool {
    match msg.to_message() {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// What the connection loop should do after a message.
enum Flow {
    Continue,
    Close,
}

async fn handle_message(
    state: &AppState,
    conn: &ConnectionGuard,
    session_guard: &mut Option<SessionGuard>,
    sender: &mut WsSender,
    msg: WsIncoming,
) -> Flow {
    let reply = match msg {
        WsIncoming::ConnectSyncplay { payload } => {
            match state.start_session(payload).await {
                Ok(handle) => {
                    conn.set_owned_session(Some(handle.session_id));
                    // Replacing a guard for a finished session is a no-op stop.
                    *session_guard = Some(SessionGuard::new(
                        handle.session_id,
                        Arc::clone(&state.session_manager),
                    ));
                    WsOutgoing::SessionStarted { payload: handle }
                }
                Err(e) => {
                    log::info!("[WS] {} start rejected: {}", conn.id(), e);
                    WsOutgoing::error(&e)
                }
            }
        }
        WsIncoming::PlaybackAction { payload } => {
            let result = match payload.into_command() {
                Ok(command) => state.session_manager.dispatch(command).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Flow::Continue,
                Err(e) => WsOutgoing::error(&e.into()),
            }
        }
        WsIncoming::ChatMessage { payload } => {
            let result = match Command::chat(payload.message) {
                Ok(command) => state.session_manager.dispatch(command).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Flow::Continue,
                Err(e) => WsOutgoing::error(&e.into()),
            }
        }
        WsIncoming::Disconnect => {
            conn.set_owned_session(None);
            // Dropping the guard stops the session this socket started.
            if let Some(guard) = session_guard.take() {
                log::info!("[WS] {} released session {}", conn.id(), guard.id());
                return Flow::Continue;
            }
            match state.session_manager.stop() {
                Ok(()) => return Flow::Continue,
                Err(e) => WsOutgoing::error(&e.into()),
            }
        }
        WsIncoming::Heartbeat => WsOutgoing::HeartbeatAck,
    };

    if send(sender, reply).await {
        Flow::Continue
    } else {
        Flow::Close
    }
}

/// WebSocket upgrade handler.
#[derive(Debug, PartialEq, Eq)]
enum Heartbeat {
    Alive,
    Ping,
    Expired,
}

/// Any inbound frame (including a pong) counts as activity.
fn heartbeat_check(idle: Duration) -> Heartbeat {
    if idle > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
        Heartbeat::Expired
    } else if idle >= Duration::from_secs(WS_PING_AFTER_SECS) {
        Heartbeat::Ping
    } else {
        Heartbeat::Alive
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut session_guard: Option<SessionGuard> = None;
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut last_activity = Instant::now();

    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();

    log::info!("[WS] New connection established: {}", conn_guard.id());

    let initial = WsOutgoing::InitialState {
        payload: state.session_manager.snapshot(),
    };
    if !send(&mut sender, initial).await {
        log::warn!("[WS] Failed to send initial state, client disconnected");
        return;
    }

    // Delay mode skips missed ticks rather than bursting to catch up.
    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(incoming) => {
                                log::debug!("[WS] {} <- {:?}", conn_guard.id(), incoming);
                                let flow = handle_message(
                                    &state,
                                    &conn_guard,
                                    &mut session_guard,
                                    &mut sender,
                                    incoming,
                                )
                                .await;
                                if let Flow::Close = flow {
                                    break;
                                }
                            }
                            Err(e) => {
                                log::debug!("[WS] Ignoring unrecognized message: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[WS] {} lagged, skipped {} event(s)", conn_guard.id(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                match heartbeat_check(last_activity.elapsed()) {
                    Heartbeat::Alive => {}
                    Heartbeat::Ping => {
                        if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    Heartbeat::Expired => {
                        log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                        break;
                    }
                }
            }
        }
    }

    // SessionGuard and ConnectionGuard Drop impls handle the cleanup.
    drop(session_guard);
}
