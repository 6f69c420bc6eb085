//! candid-sync library interface
//!
//! Exposes the sync subsystem's public APIs for integration testing and
//! for embedding the producers in the platform's REST layer.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod workers;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::sync_queue::SyncQueueStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Queue store for monitoring and administration
    pub queue_store: SyncQueueStore,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: PgPool, queue_store: SyncQueueStore) -> Self {
        Self {
            db,
            queue_store,
            startup_time: Utc::now(),
        }
    }
}

/// Build the monitoring API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::queue_routes())
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
