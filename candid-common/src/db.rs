//! Database connection pool setup
//!
//! All Candid services share one PostgreSQL database. Each service opens
//! its own pool at startup; schema initialization is idempotent and owned
//! by the service that owns the tables.

use crate::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Default pool size. Background workers hold connections across claim
/// transactions and advisory-lock sessions, so the pool must be larger
/// than the worker count.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Open a connection pool against the given database URL.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .connect(database_url)
        .await?;

    info!(max_connections, "Database connection pool established");

    Ok(pool)
}
