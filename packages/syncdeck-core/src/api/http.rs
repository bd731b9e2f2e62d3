//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the session manager and catalog.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_error, api_ok, api_success};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::SyncDeckResult;
use crate::protocol_constants::{SERVICE_ID, SSE_KEEPALIVE_SECS};
use crate::session::{Command, PlaybackAction, SessionRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let media = ServeDir::new(&state.config.media_root);
    let cors = cors_layer(&state.config.trusted_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/videos", get(list_videos))
        .route(
            "/api/session",
            get(get_session).post(start_session).delete(stop_session),
        )
        .route("/api/session/playback", post(playback_action))
        .route("/api/session/chat", post(chat_message))
        .route("/api/events", get(event_stream))
        .route("/ws", get(ws_handler))
        .nest_service("/videos", media)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser access is limited to trusted origins when any are configured.
fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let allow_origin = if trusted_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let trusted = trusted_origins.to_vec();
        log::info!("CORS trusted origins: {:?}", trusted);
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            trusted.iter().any(|allowed| origin.starts_with(allowed))
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::RANGE])
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "session": state.session_manager.current_state(),
        "connections": state.ws_manager.connection_count(),
    }))
}

/// Lists playable files under the media root.
async fn list_videos(State(state): State<AppState>) -> Response {
    let catalog = state.catalog.clone();
    match tokio::task::spawn_blocking(move || catalog.list()).await {
        Ok(videos) => api_success(videos).into_response(),
        Err(e) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e).into_response()
        }
    }
}

async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.session_manager.snapshot())
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> SyncDeckResult<impl IntoResponse> {
    let handle = state.start_session(request).await?;
    Ok(api_success(handle))
}

async fn stop_session(State(state): State<AppState>) -> SyncDeckResult<impl IntoResponse> {
    if let Some(session) = state.session_manager.snapshot().session {
        if let Some(owner) = state.ws_manager.owner_of(session.session_id) {
            log::info!(
                "[API] Stopping session {} started by {}",
                session.session_id,
                owner
            );
        }
    }
    state.session_manager.stop()?;
    Ok(api_ok())
}

async fn playback_action(
    State(state): State<AppState>,
    Json(action): Json<PlaybackAction>,
) -> SyncDeckResult<impl IntoResponse> {
    let command = action.into_command()?;
    state.session_manager.dispatch(command).await?;
    Ok(api_ok())
}

async fn chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> SyncDeckResult<impl IntoResponse> {
    let command = Command::chat(request.message)?;
    state.session_manager.dispatch(command).await?;
    Ok(api_ok())
}

/// Server-Sent Events feed of every broadcast event.
///
/// Event names are the broadcast category (`session`, `output`). A client
/// that falls behind skips the missed events and keeps streaming.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => match Event::default().event(event.category()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    log::warn!("[SSE] Failed to serialize event: {}", e);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log::warn!("[SSE] Client lagged, skipped {} event(s)", skipped);
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEPALIVE_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bootstrap_services_with_spawner;
    use crate::session::test_fixtures::{media_root, FakeSpawner};
    use crate::session::SessionState;
    use crate::state::Config;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: AppState,
        spawner: Arc<FakeSpawner>,
        _root: TempDir,
    }

    fn app() -> TestApp {
        let root = media_root();
        let config = Config {
            media_root: root.path().to_path_buf(),
            stop_grace_ms: 10,
            ..Default::default()
        };
        let spawner = Arc::new(FakeSpawner::new());
        let services = bootstrap_services_with_spawner(
            &config,
            tokio::runtime::Handle::current(),
            spawner.clone(),
        )
        .unwrap();
        let state = AppState::new(&services, Arc::new(config));
        TestApp {
            router: create_router(state.clone()),
            state,
            spawner,
            _root: root,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn start_body(video: &str) -> serde_json::Value {
        json!({
            "server": "sync.example.com",
            "room": "movie-night",
            "username": "alice",
            "videoPath": video
        })
    }

    #[tokio::test]
    async fn health_reports_idle_session() {
        let app = app();
        let (status, body) = send(&app.router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], SERVICE_ID);
        assert_eq!(body["session"], "idle");
    }

    #[tokio::test]
    async fn lists_catalog() {
        let app = app();
        let (status, body) = send(&app.router, get_req("/api/videos")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["movie.mp4"]));
    }

    #[tokio::test]
    async fn serves_media_with_ranges() {
        let app = app();
        let request = Request::get("/videos/movie.mp4")
            .header(header::RANGE, "bytes=0-1")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"fa");
    }

    #[tokio::test]
    async fn media_traversal_is_not_served() {
        let app = app();
        let response = app
            .router
            .clone()
            .oneshot(get_req("/videos/../../etc/passwd"))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let app = app();

        let (status, body) =
            send(&app.router, post_json("/api/session", start_body("movie.mp4"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["room"], "movie-night");
        assert_eq!(app.state.session_manager.current_state(), SessionState::Running);

        let (status, body) =
            send(&app.router, post_json("/api/session", start_body("movie.mp4"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_running");
        assert_eq!(body["message"], "Syncplay is already running.");

        let (status, _) = send(
            &app.router,
            post_json("/api/session/playback", json!({"action": "seek", "position": 90})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app.router, get_req("/api/session")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "running");

        let request = Request::delete("/api/session").body(Body::empty()).unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.state.session_manager.current_state(), SessionState::Idle);
        assert_eq!(app.spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn traversal_start_is_bad_request() {
        let app = app();
        let (status, body) = send(
            &app.router,
            post_json("/api/session", start_body("../../etc/passwd")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_media_path");
        assert_eq!(app.spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn commands_without_session_conflict() {
        let app = app();
        let (status, body) = send(
            &app.router,
            post_json("/api/session/playback", json!({"action": "pause"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "no_active_session");

        let request = Request::delete("/api/session").body(Body::empty()).unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_commands_are_bad_requests() {
        let app = app();
        let (status, body) = send(
            &app.router,
            post_json("/api/session/playback", json!({"action": "seek", "position": -5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_command");

        let (status, body) = send(
            &app.router,
            post_json("/api/session/chat", json!({"message": "hi\np"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_command");
    }
}
