//! Error types for r4-sync
//!
//! [`SyncError`] is the structured error every engine entry point returns.
//! [`ApiError`] maps it onto HTTP responses for the control surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::legacy_archive::LegacyError;
use crate::services::remote_gateway::GatewayError;

/// Sync engine error taxonomy
#[derive(Debug, Error)]
pub enum SyncError {
    /// Channel or track does not exist locally or remotely
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or remote store failure
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(#[from] GatewayError),

    /// Legacy snapshot or per-channel lookup failed
    #[error("Legacy archive unavailable: {0}")]
    LegacyUnavailable(#[from] LegacyError),

    /// Local store transaction failure
    #[error("Local write failed: {0}")]
    LocalWriteFailed(#[source] sqlx::Error),

    /// A pull for this channel is already in flight in this process
    #[error("Channel busy: {0}")]
    ChannelBusy(String),

    /// Local store read failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// r4-common error
    #[error("Common error: {0}")]
    Common(#[from] r4_common::Error),
}

impl SyncError {
    /// SQLite writer contention that may clear on retry
    pub fn is_lock_error(&self) -> bool {
        match self {
            SyncError::LocalWriteFailed(e) | SyncError::Database(e) => {
                e.to_string().contains("database is locked")
            }
            SyncError::Common(r4_common::Error::Database(e)) => {
                e.to_string().contains("database is locked")
            }
            _ => false,
        }
    }
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Conflict (409) - e.g., sync already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Engine error
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Sync(err) => {
                let (status, code) = match &err {
                    SyncError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    SyncError::ChannelBusy(_) => (StatusCode::CONFLICT, "CHANNEL_BUSY"),
                    SyncError::RemoteUnavailable(_) => {
                        (StatusCode::BAD_GATEWAY, "REMOTE_UNAVAILABLE")
                    }
                    SyncError::LegacyUnavailable(_) => {
                        (StatusCode::BAD_GATEWAY, "LEGACY_UNAVAILABLE")
                    }
                    SyncError::LocalWriteFailed(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "LOCAL_WRITE_FAILED")
                    }
                    SyncError::Database(_) | SyncError::Common(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
