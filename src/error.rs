//! Canonical error taxonomy (spec §7) used across the pipeline.
//!
//! Every component returns a typed [`GatewayError`] upward; the Pipeline
//! (§4.7) is the single place that renders one into a response body, so
//! the mapping from error kind to HTTP status and wire shape lives here
//! rather than scattered across handlers.

use std::time::Duration;

/// Error taxonomy from spec §7. Each variant carries the operator-visible
/// detail; the caller-visible message is derived from `Display` and
/// sanitized by [`crate::transport::sanitize_text`] before leaving the
/// process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("no route resolved for model '{0}'")]
    NoRoute(String),
    #[error("provider '{0}' is disabled")]
    ProviderDisabled(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("payload too large: {0} bytes exceeds cap of {1} bytes")]
    PayloadTooLarge(usize, usize),
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream failure: status={status} message={message}")]
    UpstreamFailure { status: u16, message: String },
    #[error("transform error: {0}")]
    TransformError(String),
    #[error("circuit open for provider '{0}'")]
    CircuitOpen(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("provider response violates dialect contract: {0}")]
    BadProviderResponse(String),
    #[error("config error: {0}")]
    Config(String),
}

/// Broad error category used to pick an HTTP status and retry semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    AuthFailed,
    NoRoute,
    NotFound,
    PayloadTooLarge,
    RateLimited,
    Timeout,
    UpstreamFailure,
    Internal,
    CircuitOpen,
    ResourceExhausted,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::AuthFailed(_) => ErrorCategory::AuthFailed,
            GatewayError::NoRoute(_) | GatewayError::ProviderDisabled(_) => ErrorCategory::NoRoute,
            GatewayError::ModelNotFound(_) => ErrorCategory::NotFound,
            GatewayError::PayloadTooLarge(..) => ErrorCategory::PayloadTooLarge,
            GatewayError::RateLimited(_) => ErrorCategory::RateLimited,
            GatewayError::Timeout(_) => ErrorCategory::Timeout,
            GatewayError::UpstreamFailure { .. } | GatewayError::BadProviderResponse(_) => {
                ErrorCategory::UpstreamFailure
            }
            GatewayError::TransformError(_) | GatewayError::Config(_) => ErrorCategory::Internal,
            GatewayError::CircuitOpen(_) => ErrorCategory::CircuitOpen,
            GatewayError::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
        }
    }

    /// Map an upstream HTTP status into the right error variant (spec §4.5).
    /// `retry_after` carries the upstream's `Retry-After` header, if any,
    /// for the `429` case.
    #[must_use]
    pub fn from_upstream_status(status: u16, message: String, retry_after: Option<u64>) -> Self {
        match status {
            400 | 422 => GatewayError::InvalidRequest(message),
            401 | 403 => GatewayError::AuthFailed(message),
            404 => GatewayError::ModelNotFound(message),
            408 | 504 => GatewayError::Timeout(message),
            413 => GatewayError::PayloadTooLarge(0, 0),
            429 => GatewayError::RateLimited(Duration::from_secs(retry_after.unwrap_or(1))),
            _ => GatewayError::UpstreamFailure { status, message },
        }
    }
}

#[must_use]
pub fn http_status(category: ErrorCategory) -> http::StatusCode {
    use http::StatusCode;
    match category {
        ErrorCategory::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCategory::AuthFailed => StatusCode::UNAUTHORIZED,
        ErrorCategory::NoRoute => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorCategory::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::UpstreamFailure => StatusCode::BAD_GATEWAY,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCategory::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Render a canonical (Anthropic-shaped) error body for the given error.
#[must_use]
pub fn canonical_error_body(err: &GatewayError) -> serde_json::Value {
    let kind = match err.category() {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::AuthFailed => "authentication_error",
        ErrorCategory::NoRoute => "invalid_request_error",
        ErrorCategory::NotFound => "not_found_error",
        ErrorCategory::PayloadTooLarge => "invalid_request_error",
        ErrorCategory::RateLimited => "rate_limit_error",
        ErrorCategory::Timeout => "timeout_error",
        ErrorCategory::UpstreamFailure => "api_error",
        ErrorCategory::Internal => "api_error",
        ErrorCategory::CircuitOpen => "overloaded_error",
        ErrorCategory::ResourceExhausted => "overloaded_error",
    };
    serde_json::json!({
        "type": "error",
        "error": {
            "type": kind,
            "message": err.to_string(),
        }
    })
}
