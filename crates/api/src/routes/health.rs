//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use courier_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports healthy only when Redis answers a PING; status lookups are dead
/// in the water without it.
async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let mut conn = state.redis.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(Json(json!({
        "status": "ok",
        "service": "courier-api",
        "version": env!("CARGO_PKG_VERSION")
    })))
}
