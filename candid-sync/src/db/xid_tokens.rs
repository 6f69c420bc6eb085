//! Persisted pseudonymous identity tokens
//!
//! The durable tier of the xid token cache. Survives process restarts so
//! a user's external identity stays stable across deployments.

use candid_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Look up a user's persisted xid, if any.
pub async fn fetch(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let xid: Option<String> =
        sqlx::query_scalar("SELECT xid FROM polis_xid_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(xid)
}

/// Persist a user's xid. Idempotent.
pub async fn store(pool: &PgPool, user_id: Uuid, xid: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO polis_xid_tokens (user_id, xid)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET xid = EXCLUDED.xid
        "#,
    )
    .bind(user_id)
    .bind(xid)
    .execute(pool)
    .await?;
    Ok(())
}
