// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Order cannot be paid in current status: {0}")]
    InvalidOrderState(String),

    #[error("Cannot deliver bundle for order with status: {0}")]
    InvalidDeliveryState(String),

    #[error("Failed to get M-Pesa access token: {0}")]
    Credential(String),

    #[error("M-Pesa gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("No checkout request to query")]
    NoCheckoutId,

    #[error("M-Pesa error: {0}")]
    Mpesa(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
            AppError::InvalidOrderState(_) => (StatusCode::BAD_REQUEST, "Invalid order state"),
            AppError::InvalidDeliveryState(_) => (StatusCode::BAD_REQUEST, "Invalid delivery state"),
            AppError::Credential(_) => (StatusCode::BAD_GATEWAY, "M-Pesa authentication failed"),
            AppError::GatewayUnavailable(_) => (StatusCode::BAD_GATEWAY, "M-Pesa gateway unavailable"),
            AppError::NoCheckoutId => (StatusCode::BAD_REQUEST, "No checkout request to query"),
            AppError::Mpesa(_) => (StatusCode::BAD_REQUEST, "M-Pesa error"),
        };

        // Internals stay in the logs; the body carries a safe label plus the
        // human-readable message.
        let body = Json(json!({
            "error": error_message,
            "message": self.to_string(),
            "success": false,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::GatewayUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
