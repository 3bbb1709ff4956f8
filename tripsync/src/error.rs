use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;
use tripsync_schema::InviteStatus;

/// Errors surfaced by the events library and the HTTP layer on top of it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invite is {0}")]
    InvalidInvite(InviteStatus),
    #[error("not signed in")]
    Unauthenticated,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("malformed document at {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::InvalidInvite(_) => "invalid_invite",
            Error::Unauthenticated | Error::Token(_) => "unauthenticated",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Malformed { .. } => "malformed_document",
            Error::Storage(_) | Error::Pool(_) => "storage",
            Error::Image(_) => "invalid_image",
            Error::Json(_) | Error::Io(_) | Error::Task(_) => "internal",
        }
    }

    /// Transient failures (busy database, exhausted pool) that a caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            Error::Pool(_) => true,
            _ => false,
        }
    }

    fn status(&self) -> StatusCode {
        if self.is_retryable() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Image(_) => StatusCode::BAD_REQUEST,
            Error::InvalidInvite(_) => StatusCode::CONFLICT,
            Error::Unauthenticated | Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        // internals stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResp {
            error: self.code(),
            message,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
