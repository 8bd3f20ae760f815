//! Delivery status lookup.
//!
//! Status is eventually consistent: a job still inside its retry window may
//! read as failed before a later attempt overwrites it with delivered, and
//! records expire after the retention TTL.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::types::DeliveryState;
use courier_delivery::status::StatusStore;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/v1/notifications/{request_id}/status",
        get(get_notification_status),
    )
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    request_id: String,
    state: DeliveryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

async fn get_notification_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let store = StatusStore::new(state.redis.clone(), state.config.status_ttl_secs);

    let record = store
        .get_status(&request_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("no status for request id {request_id}")))?;

    Ok(Json(StatusResponse {
        request_id,
        state: record.state,
        error: record.error,
        updated_at: record.updated_at,
    }))
}
