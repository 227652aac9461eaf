// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for provider drivers.
//!
//! Drivers classify upstream HTTP failures into these variants; the
//! executor maps them onto the gateway error taxonomy via
//! [`ProviderError::error_code`].

use thiserror::Error;

use crate::jobs::ErrorCode;

/// Errors from a provider driver.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider rejected the request inputs (HTTP 400).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider rejected the credential (HTTP 401).
    #[error("invalid API key")]
    InvalidApiKey,

    /// Provider rate limit hit (HTTP 429).
    #[error("rate limit exceeded")]
    RateLimited,

    /// Provider overloaded (HTTP 503); eligible for endpoint fallback.
    #[error("service overloaded: {0}")]
    Overloaded(String),

    /// Provider server error (other HTTP >= 500).
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// Any other non-2xx, or an error object in a 2xx body.
    #[error("provider error ({status}): {message}")]
    Api {
        /// HTTP status code (0 when the error came from the body)
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// The response parsed but carried zero images.
    #[error("provider returned no images")]
    NoImages,

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body did not parse.
    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Unknown endpoint tag.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

impl ProviderError {
    /// Map onto the gateway error taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidApiKey => ErrorCode::InvalidApiKey,
            Self::RateLimited => ErrorCode::RateLimitExceeded,
            Self::Overloaded(_) => ErrorCode::ServiceOverload,
            Self::Server { .. } => ErrorCode::ServerError,
            Self::Api { .. } | Self::Parse(_) => ErrorCode::GeminiError,
            Self::NoImages => ErrorCode::NoImages,
            Self::Network(_) | Self::UnknownEndpoint(_) => ErrorCode::UnknownError,
        }
    }

    /// Whether the failure may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Whether an overload fallback through another endpoint applies.
    pub fn is_overload(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }
}
