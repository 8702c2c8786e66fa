//! Web server module.
//!
//! This module provides:
//! - `POST /webhook`: signed message ingestion with idempotent storage
//! - `GET /messages`, `GET /stats`: read endpoints over the store
//! - `GET /health/live`, `GET /health/ready`: probes

pub mod error;
pub mod handlers;
pub mod payload;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use handlers::{
    health_live, health_ready, list_messages, stats, webhook, AppState, ListParams,
    MessagesResponse, StatusResponse, DEFAULT_LIMIT, MAX_LIMIT, REQUEST_ID_HEADER,
};
pub use payload::{parse_message, ValidationError};
pub use signature::{compute_signature, verify_signature, SIGNATURE_HEADER};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/webhook", post(webhook))
        .route("/messages", get(list_messages))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
