//! Request failure taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::store::StorageError;
use crate::web::handlers::StatusResponse;
use crate::web::payload::ValidationError;

/// Every way a request can fail.
///
/// A duplicate insert is not here: it is a success for the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid `X-Signature`. Never retried by us.
    #[error("invalid signature")]
    Unauthorized,

    /// Body failed validation. Not retryable.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ValidationError),

    /// Query string out of range or unparseable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The store failed. Safe for the sender to retry.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Label used for the `result` field of structured logs.
    pub fn result_label(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "invalid_signature",
            ApiError::InvalidPayload(_) => "invalid_payload",
            ApiError::InvalidQuery(_) => "invalid_query",
            ApiError::Storage(_) => "storage_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidPayload(_) | ApiError::InvalidQuery(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Storage(StorageError::from(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Storage details stay in the logs.
        let detail = match &self {
            ApiError::InvalidPayload(e) => Some(e.to_string()),
            ApiError::InvalidQuery(reason) => Some(reason.clone()),
            ApiError::Unauthorized | ApiError::Storage(_) => None,
        };

        (
            self.status_code(),
            Json(StatusResponse {
                status: self.result_label(),
                detail,
            }),
        )
            .into_response()
    }
}
