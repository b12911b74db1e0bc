use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the retrieval/knowledge/feedback services.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad input from the caller of a chat turn, as opposed to a failed
    /// internal check along the way.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error: {0}")]
    Provider(anyhow::Error),

    #[error("Rate limit exceeded for bot {bot_id}: requested {requested}, available {available}")]
    RateLimitExceeded {
        bot_id: i64,
        requested: u32,
        available: u32,
        retry_after: Duration,
    },

    #[error("Persistence error: {0}")]
    Persistence(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn provider(err: anyhow::Error) -> Self {
        Self::Provider(err)
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

/// Outcome of a failed chat turn as seen by callers of the orchestrator.
///
/// Everything except bad request input and rate limiting collapses into
/// `ProcessingFailed`, internal validation failures included.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Processing failed")]
    ProcessingFailed,
}

impl From<CoreError> for TurnError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRequest(msg) => TurnError::Invalid(msg),
            CoreError::RateLimitExceeded { retry_after, .. } => TurnError::RateLimited { retry_after },
            other => {
                tracing::error!("Turn failed: {}", other);
                TurnError::ProcessingFailed
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many requests, retry after {0:?}")]
    TooManyRequests(Duration),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) | CoreError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::RateLimitExceeded { retry_after, .. } => ApiError::TooManyRequests(retry_after),
            CoreError::Provider(e) => ApiError::UpstreamError(e.to_string()),
            CoreError::Persistence(e) => ApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Invalid(msg) => ApiError::BadRequest(msg),
            TurnError::RateLimited { retry_after } => ApiError::TooManyRequests(retry_after),
            TurnError::ProcessingFailed => ApiError::InternalError("processing failed".to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg.clone())
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg.clone())
            }
            ApiError::TooManyRequests(_) => {
                tracing::warn!("Rate limited: {}", self);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RateLimitExceeded",
                    "The bot is busy, please retry later".to_string(),
                )
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError", msg.clone())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg.clone())
            }
            ApiError::UpstreamError(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "UpstreamError", msg.clone())
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        if let ApiError::TooManyRequests(retry_after) = self {
            let secs = retry_after.as_secs().max(1).to_string();
            return (status, [(header::RETRY_AFTER, secs)], body).into_response();
        }

        (status, body).into_response()
    }
}
