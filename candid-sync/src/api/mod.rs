//! Monitoring API endpoints

mod health;
mod queue;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Health and status routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
}

/// Queue monitoring and administration routes
pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/stats", get(queue::stats))
        .route("/sync/requeue/:id", post(queue::requeue))
}
