//! Error taxonomy shared by the service, the store and the proxy
//!
//! Every variant maps onto exactly one HTTP status. Handlers return
//! `Result<_, EvalError>` and axum turns the error into a plain-text response.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

/// Errors raised while serving or relaying evaluation traffic
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// Malformed or out-of-range input from the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced identifier is unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// The query ID counter could not issue an identifier
    #[error("query ID allocator unavailable: {0}")]
    AllocatorUnavailable(String),

    /// The proxy could not reach the real service
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The journal rejected a write; nothing was recorded
    #[error("storage failure: {0}")]
    Storage(String),

    /// Malformed HTTP framing
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The endpoint exists but not for this method
    #[error("{endpoint} does not accept {method}")]
    MethodNotAllowed { endpoint: String, method: String },
}

impl EvalError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// HTTP status used when this error is reported to a client
    pub fn status(&self) -> StatusCode {
        match self {
            EvalError::InvalidArgument(_) | EvalError::Protocol(_) => StatusCode::BAD_REQUEST,
            EvalError::NotFound(_) => StatusCode::NOT_FOUND,
            EvalError::AllocatorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EvalError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            EvalError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvalError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for EvalError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("API error: {} - {}", status, message);
        } else {
            tracing::warn!("API error: {} - {}", status, message);
        }

        (status, message).into_response()
    }
}
