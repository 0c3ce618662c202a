use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

/// Failures of period resolution, query construction and backend access.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A query failed builder validation. Only reachable through a bug in
    /// the metric mappings, never through request input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend call timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl QueryError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::InvalidParameter { .. } => Self::bad_request(err.to_string()),
            QueryError::InvalidQuery(_) | QueryError::Encode(_) => {
                tracing::error!(error = %err, "internal error");
                Self::internal("Internal server error")
            }
            QueryError::BackendUnavailable(_) => {
                tracing::warn!(error = %err, "time-series backend unavailable");
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            QueryError::BackendTimeout(_) => {
                tracing::warn!(error = %err, "time-series backend timed out");
                Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string())
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
