//! Schema initialization for candid-sync owned tables
//!
//! Idempotent startup DDL: every `create_*_table` function is safe to run
//! on every boot. The `positions` and `votes` tables belong to the
//! platform's REST layer; they are created here as well so a fresh
//! database is usable end to end.

use candid_common::Result;
use sqlx::PgPool;
use tracing::info;

/// Create all candid-sync tables and indexes if they do not exist.
pub async fn init_tables(pool: &PgPool) -> Result<()> {
    create_positions_table(pool).await?;
    create_votes_table(pool).await?;
    create_sync_queue_table(pool).await?;
    create_conversations_table(pool).await?;
    create_comment_mappings_table(pool).await?;
    create_xid_tokens_table(pool).await?;
    create_user_coords_table(pool).await?;
    create_comment_coords_table(pool).await?;
    create_cluster_centroids_table(pool).await?;
    create_training_log_table(pool).await?;

    info!("Database tables initialized");
    Ok(())
}

/// Platform positions table (owned by the REST layer, created for
/// standalone deployments and tests)
async fn create_positions_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id UUID PRIMARY KEY,
            statement TEXT NOT NULL,
            category_id UUID,
            location_id UUID NOT NULL,
            creator_user_id UUID NOT NULL,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Platform votes table (owned by the REST layer, created for standalone
/// deployments and tests)
async fn create_votes_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            id UUID PRIMARY KEY,
            position_id UUID NOT NULL,
            user_id UUID NOT NULL,
            response TEXT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (position_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Durable sync queue. The claim predicate (status + next_retry_time,
/// ordered by created_time) is covered by a dedicated index.
async fn create_sync_queue_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polis_sync_queue (
            id UUID PRIMARY KEY,
            operation_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            error_message TEXT,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_polis_sync_queue_claim
        ON polis_sync_queue (status, next_retry_time, created_time)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Local mirror of external conversations. The partial unique index
/// enforces at most one active conversation per (location, category,
/// window start); NULL category collapses to the zero UUID so the
/// location-wide conversation participates in the constraint too.
async fn create_conversations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polis_conversations (
            id UUID PRIMARY KEY,
            location_id UUID NOT NULL,
            category_id UUID,
            external_conversation_id TEXT NOT NULL,
            conversation_type TEXT NOT NULL,
            active_from DATE NOT NULL,
            active_until DATE NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_polis_conversations_window
        ON polis_conversations (
            location_id,
            COALESCE(category_id, '00000000-0000-0000-0000-000000000000'::uuid),
            active_from
        )
        WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// position -> external comment mapping per conversation; pruned after
/// conversation expiry
async fn create_comment_mappings_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polis_comment_mappings (
            position_id UUID NOT NULL,
            conversation_id UUID NOT NULL,
            external_comment_id BIGINT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (position_id, conversation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_polis_comment_mappings_conversation
        ON polis_comment_mappings (conversation_id)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Persisted tier of the pseudonymous identity token cache
async fn create_xid_tokens_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polis_xid_tokens (
            user_id UUID PRIMARY KEY,
            xid TEXT NOT NULL,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Per-conversation 2D user coordinates: PCA-supplied ('pca') and
/// factorization output ('mf')
async fn create_user_coords_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_ideology_coords (
            conversation_id UUID NOT NULL,
            user_id UUID NOT NULL,
            x DOUBLE PRECISION NOT NULL,
            y DOUBLE PRECISION NOT NULL,
            source TEXT NOT NULL,
            updated_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (conversation_id, user_id, source)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Per-conversation 2D comment (position) coordinates from
/// factorization output
async fn create_comment_coords_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comment_ideology_coords (
            conversation_id UUID NOT NULL,
            position_id UUID NOT NULL,
            x DOUBLE PRECISION NOT NULL,
            y DOUBLE PRECISION NOT NULL,
            updated_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (conversation_id, position_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Cluster centroids from the external PCA math, refreshed on each
/// training pass; feeds max-distance normalization for vote weights
async fn create_cluster_centroids_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS polis_cluster_centroids (
            conversation_id UUID NOT NULL,
            cluster_id BIGINT NOT NULL,
            x DOUBLE PRECISION NOT NULL,
            y DOUBLE PRECISION NOT NULL,
            updated_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (conversation_id, cluster_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Append-only audit trail of training attempts
async fn create_training_log_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mf_training_log (
            id UUID PRIMARY KEY,
            conversation_id UUID NOT NULL,
            location_id UUID NOT NULL,
            category_id UUID,
            n_users INTEGER NOT NULL,
            n_comments INTEGER NOT NULL,
            n_votes INTEGER NOT NULL,
            error_message TEXT,
            created_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_mf_training_log_conversation
        ON mf_training_log (conversation_id, created_time DESC)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
