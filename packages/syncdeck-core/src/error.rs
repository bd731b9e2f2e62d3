//! Centralized error types for the SyncDeck core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every session error a stable machine-readable code
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::session::{DispatchError, LaunchError, StartError, StopError};

/// Trait for error types that provide machine-readable error codes.
///
/// The same code is used in HTTP error bodies and in WebSocket `STATUS`
/// messages, so clients can branch on it while showing the text.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for LaunchError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidMediaPath(_) => "invalid_media_path",
            Self::SpawnFailed(_) => "spawn_failed",
        }
    }
}

impl ErrorCode for StartError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Launch(e) => e.code(),
            Self::Cancelled => "start_cancelled",
        }
    }
}

impl ErrorCode for StopError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
        }
    }
}

impl ErrorCode for DispatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
            Self::InvalidCommand(_) => "invalid_command",
            Self::ProcessGone(_) => "process_gone",
            Self::WriteTimeout => "write_timeout",
        }
    }
}

/// Application-wide error type for the SyncDeck server.
#[derive(Debug, Error)]
pub enum SyncDeckError {
    /// Starting a session failed.
    #[error(transparent)]
    Start(#[from] StartError),

    /// Stopping a session failed.
    #[error(transparent)]
    Stop(#[from] StopError),

    /// Delivering a command to the player failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncDeckError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Start(e) => e.code(),
            Self::Stop(e) => e.code(),
            Self::Dispatch(e) => e.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Start(StartError::AlreadyRunning | StartError::Cancelled) => StatusCode::CONFLICT,
            Self::Start(StartError::InvalidRequest(_))
            | Self::Start(StartError::Launch(LaunchError::InvalidMediaPath(_))) => {
                StatusCode::BAD_REQUEST
            }
            Self::Stop(StopError::NoActiveSession)
            | Self::Dispatch(DispatchError::NoActiveSession) => StatusCode::CONFLICT,
            Self::Dispatch(DispatchError::InvalidCommand(_)) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Dispatch(DispatchError::ProcessGone(_)) => StatusCode::GONE,
            Self::Dispatch(DispatchError::WriteTimeout) => StatusCode::GATEWAY_TIMEOUT,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Start(StartError::Launch(LaunchError::SpawnFailed(_))) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type SyncDeckResult<T> = Result<T, SyncDeckError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for SyncDeckError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
