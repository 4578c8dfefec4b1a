/// Unified error types for the Mojang API proxy
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the proxy
///
/// `Clone` so a single flush failure can be handed to every request
/// that the flush claimed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Upstream rejected a batch as malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Username failed syntax checks before reaching the core
    #[error("Invalid username: {0}")]
    InvalidName(String),

    /// Id is neither a dashed nor an undashed UUID
    #[error("Invalid UUID: {0}")]
    InvalidId(String),

    /// Upstream answered with a non-2xx status other than 400
    #[error("Upstream server error: HTTP {0}")]
    UpstreamStatus(u16),

    /// Per-call deadline exceeded
    #[error("Upstream request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS failure, ...
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream returned data the proxy cannot interpret
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Coalescer no longer accepts requests
    #[error("Service is shutting down")]
    ShuttingDown,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Wire-level error type reported to API clients
    pub fn error_type(&self) -> ErrorType {
        match self {
            ProxyError::InvalidName(_) | ProxyError::Validation(_) => ErrorType::InvalidName,
            ProxyError::InvalidId(_) => ErrorType::InvalidUuid,
            ProxyError::Timeout => ErrorType::InternalTimeout,
            ProxyError::RateLimitExceeded => ErrorType::RateLimited,
            _ => ErrorType::InternalError,
        }
    }

    /// HTTP status used when the error reaches a client
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidName(_) | ProxyError::Validation(_) | ProxyError::InvalidId(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::Timeout | ProxyError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error identifiers exposed in API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    InvalidName,
    InvalidUuid,
    InternalTimeout,
    InternalError,
    RateLimited,
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorType,
}

/// Convert ProxyError to HTTP response
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.error_type(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
