//! Database access for candid-sync

pub mod advisory_lock;
pub mod conversations;
pub mod coords;
pub mod mappings;
pub mod schema;
pub mod sync_queue;
pub mod training_log;
pub mod votes;
pub mod xid_tokens;

use candid_common::Result;
use sqlx::PgPool;

/// Open the pool and run idempotent schema initialization.
pub async fn init_database(database_url: &str) -> Result<PgPool> {
    let pool =
        candid_common::db::init_pool(database_url, candid_common::db::DEFAULT_MAX_CONNECTIONS)
            .await?;
    schema::init_tables(&pool).await?;
    Ok(pool)
}
