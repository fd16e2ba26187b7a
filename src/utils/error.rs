use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use crate::service::{CancelError, PurchaseError};
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientStock(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            // Expected business outcomes, not system failures.
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::InsufficientStock(msg) => {
                debug!(error = ?self, message = %msg, "Request rejected");
            }
            AppError::ServiceUnavailable(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::InvalidQuantity => AppError::ValidationError(err.to_string()),
            PurchaseError::ConcertNotFound => AppError::NotFound(err.to_string()),
            PurchaseError::InsufficientStock => AppError::InsufficientStock(err.to_string()),
            PurchaseError::Unavailable => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<CancelError> for AppError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::NotFound => AppError::NotFound(err.to_string()),
            CancelError::Unavailable => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::NotFound(msg)
            | AppError::InsufficientStock(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::InternalServerError(msg) => msg.clone(),
        };

        // Do not expose internal details in the API response
        let details = None;

        error_response(code, public_message, details, status)
    }
}
