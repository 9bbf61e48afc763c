//! Unified error handling for the checkout service
//!
//! Maps domain errors onto HTTP status codes and client-safe messages.
//! Provider and store errors are converted here so handlers never deal
//! with layer-specific types.

use crate::providers::error::PaymentError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("payment provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("storage error: {message}")]
    Store { message: String, retryable: bool },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Provider { .. } => 502,
            AppError::Store { .. } => 500,
            AppError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Provider { .. } => "PAYMENT_PROVIDER_ERROR",
            AppError::Store { .. } => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider { retryable, .. } | AppError::Store { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(message) | AppError::NotFound(message) => message.clone(),
            AppError::Provider { .. } => "Payment provider returned an error".to_string(),
            AppError::Store { .. } | AppError::Internal(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::ValidationError { message, .. } => AppError::Validation(message.clone()),
            _ => AppError::Provider {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_classes() {
        assert_eq!(AppError::Validation("bad".to_string()).status_code(), 400);
        assert_eq!(AppError::NotFound("missing".to_string()).status_code(), 404);
        assert_eq!(
            AppError::Provider {
                message: "down".to_string(),
                retryable: true
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn payment_validation_errors_stay_client_errors() {
        let err: AppError = PaymentError::ValidationError {
            message: "price must be greater than zero".to_string(),
            field: Some("price".to_string()),
        }
        .into();
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("price"));
    }
}
