//! Error response formatting
//!
//! Standardized JSON error responses with consistent structure, HTTP
//! status codes and request ids for debugging.

use crate::error::AppError;
use axum::{http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure returned to clients for all
/// error cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError, request_id: Option<String>) -> Self {
        Self {
            error: error.error_code().to_string(),
            message: error.user_message(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn new(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            error: "ERROR".to_string(),
            message: message.into(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            retryable: None,
        }
    }
}

pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse::new(message, request_id)))
}

pub fn app_error_response(
    error: &AppError,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse::from_app_error(error, request_id)),
    )
}

pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_code_and_retryability() {
        let err = AppError::Provider {
            message: "gateway 503".to_string(),
            retryable: true,
        };
        let response = ErrorResponse::from_app_error(&err, Some("req-1".to_string()));
        assert_eq!(response.error, "PAYMENT_PROVIDER_ERROR");
        assert_eq!(response.request_id.as_deref(), Some("req-1"));
        assert_eq!(response.retryable, Some(true));
    }

    #[test]
    fn request_id_is_read_from_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-request-id", "abc-123".parse().unwrap());
        assert_eq!(
            get_request_id_from_headers(&headers).as_deref(),
            Some("abc-123")
        );
        assert_eq!(get_request_id_from_headers(&axum::http::HeaderMap::new()), None);
    }
}
