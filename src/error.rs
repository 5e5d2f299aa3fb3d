use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::EngineError;
use crate::storage::RepositoryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no couriers available")]
    NoAvailableCouriers,

    #[error("too many requests")]
    TooManyRequests,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NoAvailableCouriers => {
                (StatusCode::CONFLICT, "no couriers available".to_string())
            }
            AppError::TooManyRequests => {
                (StatusCode::TOO_MANY_REQUESTS, "too many requests".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidOrderId => AppError::BadRequest(err.to_string()),
            EngineError::NoAvailableCourier => AppError::NoAvailableCouriers,
            EngineError::AlreadyAssigned(_) => AppError::Conflict(err.to_string()),
            EngineError::DeliveryNotFound(_) => AppError::NotFound(err.to_string()),
            EngineError::UnknownTransport(_) | EngineError::Repository(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::CourierNotFound => AppError::NotFound(err.to_string()),
            RepositoryError::CourierBusy | RepositoryError::DuplicateOrder => {
                AppError::Conflict(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}
