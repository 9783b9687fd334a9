//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ripple_engine::protocol::{APPLICATION_ERROR, INTERNAL_ERROR};
use ripple_engine::RpcError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Engine(ripple_engine::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ripple_engine::Error> for AppError {
    fn from(e: ripple_engine::Error) -> Self {
        match e {
            ripple_engine::Error::UnknownMethod(method) => AppError::MethodNotFound(method),
            ripple_engine::Error::InvalidParams(msg) => AppError::InvalidParams(msg),
            other => AppError::Engine(other),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<&AppError> for RpcError {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::DatabaseNotFound(_) => RpcError::new(APPLICATION_ERROR, e.to_string()),
            AppError::MethodNotFound(method) => RpcError::method_not_found(method),
            AppError::InvalidParams(_) => RpcError::invalid_params(e.to_string()),
            AppError::Engine(inner) => RpcError::from(inner),
            AppError::Internal(_) => RpcError::new(INTERNAL_ERROR, e.to_string()),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::DatabaseNotFound(_) | AppError::MethodNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string(), None)
            }
            AppError::InvalidParams(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),
            AppError::Engine(e) => {
                tracing::warn!("Engine error: {:?}", e);
                (StatusCode::BAD_REQUEST, e.to_string(), None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
