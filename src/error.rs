use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("configuration file {path} is corrupt: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("configuration file {path} could not be accessed: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("cache topology misconfigured: {0}")]
    TopologyMisconfigured(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    /// Carries the seconds left in the current window.
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("shutdown did not persist configuration: {0}")]
    ShutdownFailed(String),

    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

impl From<validator::ValidationErrors> for OverlayError {
    fn from(err: validator::ValidationErrors) -> Self {
        OverlayError::ValidationError(err.to_string())
    }
}

/// Body returned for every throttled request.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub detail: &'static str,
}

impl RejectionBody {
    pub const TOO_MANY_REQUESTS: RejectionBody = RejectionBody {
        detail: "Too many requests",
    };
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_overlay_error(err: &OverlayError) -> Self {
        let message = err.to_string();
        match err {
            OverlayError::ConfigCorrupt { .. } => Self::new("config_corrupt", &message, 500),
            OverlayError::ConfigIo { .. } => Self::new("config_io", &message, 500),
            OverlayError::StoreUnavailable(_) => Self::new("service_unavailable", &message, 503),
            OverlayError::TopologyMisconfigured(_) => {
                Self::new("configuration_error", &message, 500)
            }
            OverlayError::ValidationError(_) => Self::new("validation_error", &message, 422),
            OverlayError::RateLimitExceeded { .. } => {
                Self::new("rate_limit_exceeded", &message, 429)
            }
            OverlayError::ShutdownFailed(_) | OverlayError::Server(_) => {
                Self::new("internal_error", &message, 500)
            }
        }
    }
}

impl IntoResponse for OverlayError {
    fn into_response(self) -> Response {
        if let OverlayError::RateLimitExceeded { retry_after_secs } = self {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RejectionBody::TOO_MANY_REQUESTS),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            return response;
        }

        let body = ErrorResponse::from_overlay_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_maps_to_503() {
        let response = OverlayError::StoreUnavailable("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rejection_carries_retry_after() {
        let response = OverlayError::RateLimitExceeded { retry_after_secs: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }

    #[test]
    fn test_validation_maps_to_422() {
        let body = ErrorResponse::from_overlay_error(&OverlayError::ValidationError("bad".into()));
        assert_eq!(body.code, 422);
        assert_eq!(body.error, "validation_error");
    }

    #[test]
    fn test_rejection_body_shape() {
        let json = serde_json::to_value(RejectionBody::TOO_MANY_REQUESTS).unwrap();
        assert_eq!(json, serde_json::json!({"detail": "Too many requests"}));
    }
}
