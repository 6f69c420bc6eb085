//! Health and status handlers

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Service status: version, uptime, queue counts.
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let uptime_seconds = (Utc::now() - state.startup_time).num_seconds();
    let queue = state.queue_store.stats().await?;

    Ok(Json(json!({
        "service": "candid-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "queue": queue,
    })))
}
