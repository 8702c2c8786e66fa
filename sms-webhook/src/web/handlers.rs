//! HTTP endpoint handlers.
//!
//! The webhook handler runs each delivery through:
//! 1. Verify the `X-Signature` HMAC (401 on failure, store untouched)
//! 2. Validate the JSON body (422 on failure, store untouched)
//! 3. Insert into the store (500 on storage failure)
//! 4. Respond `{"status":"ok"}` for both created and duplicate deliveries
//!
//! Whether a delivery was a duplicate is only visible in the logs.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{InsertOutcome, Message, MessageFilter, MessageStore, Stats};
use crate::web::error::ApiError;
use crate::web::payload::parse_message;
use crate::web::signature::{verify_signature, SIGNATURE_HEADER};
use crate::Config;

/// Default page size for `GET /messages`.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page size accepted by `GET /messages`.
pub const MAX_LIMIT: u32 = 100;

/// Response header echoing the id carried by this request's log events.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: MessageStore,
}

impl AppState {
    pub fn new(config: Config, store: MessageStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

/// Minimal status body shared by webhook, health and error responses.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusResponse {
    pub fn new(status: &'static str) -> Self {
        Self {
            status,
            detail: None,
        }
    }
}

// =============================================================================
// Health Checks
// =============================================================================

/// Liveness: the process is up.
pub async fn health_live() -> Json<StatusResponse> {
    Json(StatusResponse::new("live"))
}

/// Readiness: a secret is configured and the store answers queries.
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    if !state.config.has_webhook_secret() {
        warn!("ready_check_secret_missing");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse::new("unready")),
        );
    }

    if let Err(e) = state.store.ping().await {
        warn!(error = %e, "ready_check_store_unreachable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse::new("unready")),
        );
    }

    (StatusCode::OK, Json(StatusResponse::new("ready")))
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook endpoint.
///
/// Every response, success or failure, carries an `X-Request-Id` header.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let start = Instant::now();
    let request_id = Uuid::new_v4();

    info!(
        request_id = %request_id,
        body_length = body.len(),
        has_signature = headers.contains_key(SIGNATURE_HEADER),
        "webhook_received"
    );

    let result = ingest(&state, &headers, &body).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok((message_id, outcome)) => {
            info!(
                request_id = %request_id,
                message_id = %message_id,
                result = outcome.as_str(),
                dup = outcome.is_duplicate(),
                latency_ms = latency_ms,
                "webhook_stored"
            );
        }
        Err(e @ ApiError::Storage(_)) => {
            error!(
                request_id = %request_id,
                result = e.result_label(),
                error = %e,
                latency_ms = latency_ms,
                "webhook_store_failed"
            );
        }
        Err(e) => {
            warn!(
                request_id = %request_id,
                result = e.result_label(),
                error = %e,
                latency_ms = latency_ms,
                "webhook_rejected"
            );
        }
    }

    (
        [(REQUEST_ID_HEADER, request_id.to_string())],
        result.map(|_| Json(StatusResponse::new("ok"))),
    )
}

async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(String, InsertOutcome), ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(state.config.secret_bytes(), body, signature) {
        return Err(ApiError::Unauthorized);
    }

    let message = parse_message(body)?;
    let message_id = message.message_id.clone();

    // Spawned so that a client disconnect cannot cancel a write in flight.
    let store = state.store.clone();
    let outcome = tokio::spawn(async move { store.insert(&message).await }).await??;

    Ok((message_id, outcome))
}

// =============================================================================
// Messages
// =============================================================================

/// Query string for `GET /messages`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub from: Option<String>,
    pub since: Option<String>,
    pub q: Option<String>,
}

impl ListParams {
    /// Apply defaults and bounds, returning `(limit, offset, filter)`.
    fn resolve(self) -> Result<(u32, u32, MessageFilter), ApiError> {
        let limit = match self.limit {
            None => DEFAULT_LIMIT,
            Some(l) if (1..=i64::from(MAX_LIMIT)).contains(&l) => l as u32,
            Some(l) => {
                return Err(ApiError::InvalidQuery(format!(
                    "limit must be between 1 and {}, got {}",
                    MAX_LIMIT, l
                )))
            }
        };

        let offset = match self.offset {
            None => 0,
            Some(o) => u32::try_from(o).map_err(|_| {
                ApiError::InvalidQuery(format!("offset must be non-negative, got {}", o))
            })?,
        };

        let filter = MessageFilter {
            from: non_empty(self.from),
            since: non_empty(self.since),
            q: non_empty(self.q),
        };

        Ok((limit, offset, filter))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Page of messages.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub data: Vec<Message>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

/// List messages ordered by `(ts, message_id)`.
pub async fn list_messages(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidQuery(e.body_text()))?;
    let (limit, offset, filter) = params.resolve()?;

    let (data, total) = state
        .store
        .list_messages(limit, offset, &filter)
        .await
        .map_err(|e| {
            error!(error = %e, "messages_query_failed");
            ApiError::from(e)
        })?;

    info!(
        limit = limit,
        offset = offset,
        filtered = !filter.is_empty(),
        returned = data.len(),
        total = total,
        "messages_listed"
    );

    Ok(Json(MessagesResponse {
        data,
        total,
        limit,
        offset,
    }))
}

// =============================================================================
// Stats
// =============================================================================

/// Aggregate statistics over all stored messages.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    let stats = state.store.stats().await.map_err(|e| {
        error!(error = %e, "stats_query_failed");
        ApiError::from(e)
    })?;

    Ok(Json(stats))
}
