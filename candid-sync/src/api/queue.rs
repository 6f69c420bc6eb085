//! Queue monitoring and administration handlers

use crate::db::sync_queue::QueueStats;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

/// Per-status item counts.
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    let stats = state.queue_store.stats().await?;
    Ok(Json(stats))
}

/// Return a terminally failed item to the queue.
pub async fn requeue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let requeued = state.queue_store.requeue_failed(id).await?;
    if !requeued {
        return Err(ApiError::Conflict(format!(
            "Item {} is not in a failed state",
            id
        )));
    }
    Ok(Json(json!({ "requeued": id })))
}
