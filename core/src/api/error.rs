// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;

use super::models::ErrorResponse;
use crate::database::DatabaseError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Malformed or invalid request (400)
    InvalidRequest(String),
    /// Missing or wrong API key (401)
    Unauthorized(String),
    /// Resource does not exist for this tenant (404)
    NotFound(String),
    /// Resource exists but is not in a state that allows the action (400)
    InvalidState(String),
    /// Request admission denied (429)
    RateLimitExceeded(String),
    /// Internal server error (500)
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Deterministic error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest(msg)
            | Self::Unauthorized(msg)
            | Self::NotFound(msg)
            | Self::InvalidState(msg)
            | Self::RateLimitExceeded(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(self.error_code(), self.message());
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            // Internal detail never reaches clients verbatim
            other => {
                tracing::error!(error = %other, "database error during request");
                Self::Internal("internal error".to_string())
            }
        }
    }
}

impl From<crate::coord::CoordError> for ApiError {
    fn from(err: crate::coord::CoordError) -> Self {
        tracing::error!(error = %err, "coordination store error during request");
        Self::Internal("internal error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidState("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::RateLimitExceeded("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::InvalidState("x".into()).error_code(),
            "INVALID_STATE"
        );
        assert_eq!(ApiError::NotFound("x".into()).error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_display() {
        let error = ApiError::NotFound("job not found".into());
        assert_eq!(error.to_string(), "NOT_FOUND: job not found");
    }
}
