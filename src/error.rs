//! Error types for switchboard.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for switchboard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for switchboard.
///
/// Per-attempt routing failures are *not* represented here; those are
/// collected as [`crate::router::AttemptError`] values so that fallback can
/// continue. This type covers the fatal paths: bad input, configuration,
/// and infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_format"),
            Error::InvalidPrompt(_) => (StatusCode::BAD_REQUEST, "invalid_prompt"),
            Error::Upstream(_) => (StatusCode::BAD_GATEWAY, "request_failed"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = serde_json::json!({
            "code": code,
            "message": self.to_string(),
            "statusCode": status.as_u16(),
            "details": [],
        });

        (status, axum::Json(body)).into_response()
    }
}
