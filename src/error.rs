use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Stable error kinds surfaced to clients; see the error taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing or invalid credentials")]
    Auth,
    #[error("{0}")]
    KeyFormat(String),
    #[error("{0}")]
    KeyPrecondition(String),
    #[error("{0}")]
    KeySignature(String),
    #[error("{0}")]
    KeyQuota(String),
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited { targeted: bool },
    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("transparency log unavailable")]
    Unavailable,
    #[error("invariant violation: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::KeyFormat(_) => "KEY_FORMAT",
            Self::KeyPrecondition(_) => "KEY_PRECONDITION",
            Self::KeySignature(_) => "KEY_SIGNATURE",
            Self::KeyQuota(_) => "KEY_QUOTA",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Store(_) => "STORE",
            Self::Unavailable => "UNAVAILABLE",
            Self::Fatal(_) => "FATAL",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::KeyFormat(_) | Self::KeyPrecondition(_) | Self::KeySignature(_) | Self::KeyQuota(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Store(_) | Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(e) => tracing::error!(error = %e, kind = self.kind(), "storage error"),
            Self::Fatal(msg) => tracing::error!(message = %msg, kind = self.kind(), "invariant violation"),
            Self::RateLimited { targeted: true } => tracing::warn!(kind = self.kind(), "targeted rate limit trip"),
            _ => tracing::debug!(kind = self.kind(), "request rejected"),
        }

        let status = self.status();
        let message = self.to_string();
        let kind = self.kind();

        (status, Json(json!({ "error": { "kind": kind, "message": message } }))).into_response()
    }
}
