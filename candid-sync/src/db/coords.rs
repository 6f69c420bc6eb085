//! Ideological coordinate persistence
//!
//! Two coordinate sources coexist per (conversation, user): 'pca' rows
//! mirror the external clustering math, 'mf' rows hold factorization
//! output. Cluster centroids are cached per conversation for vote-weight
//! normalization.

use candid_common::{Coords, Result};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Coordinate provenance labels
pub const SOURCE_PCA: &str = "pca";
pub const SOURCE_MF: &str = "mf";

/// Upsert one user's coordinates for a conversation.
pub async fn upsert_user_coords(
    pool: &PgPool,
    conversation_id: Uuid,
    user_id: Uuid,
    coords: Coords,
    source: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_ideology_coords (conversation_id, user_id, x, y, source, updated_time)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (conversation_id, user_id, source)
        DO UPDATE SET x = EXCLUDED.x, y = EXCLUDED.y, updated_time = NOW()
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(coords.x)
    .bind(coords.y)
    .bind(source)
    .execute(pool)
    .await?;
    Ok(())
}

/// All coordinates of one source for a conversation.
pub async fn fetch_coords_by_source(
    pool: &PgPool,
    conversation_id: Uuid,
    source: &str,
) -> Result<HashMap<Uuid, Coords>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, x, y
        FROM user_ideology_coords
        WHERE conversation_id = $1 AND source = $2
        "#,
    )
    .bind(conversation_id)
    .bind(source)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get::<Uuid, _>("user_id"),
                Coords::new(row.get("x"), row.get("y")),
            )
        })
        .collect())
}

/// One user's coordinates, preferring factorization output over the PCA
/// mirror.
pub async fn fetch_user_coords(
    pool: &PgPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Coords>> {
    let row = sqlx::query(
        r#"
        SELECT x, y
        FROM user_ideology_coords
        WHERE conversation_id = $1 AND user_id = $2
        ORDER BY CASE source WHEN 'mf' THEN 0 ELSE 1 END
        LIMIT 1
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Coords::new(r.get("x"), r.get("y"))))
}

/// Upsert one comment's (position's) coordinates for a conversation.
pub async fn upsert_comment_coords(
    pool: &PgPool,
    conversation_id: Uuid,
    position_id: Uuid,
    coords: Coords,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO comment_ideology_coords (conversation_id, position_id, x, y, updated_time)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (conversation_id, position_id)
        DO UPDATE SET x = EXCLUDED.x, y = EXCLUDED.y, updated_time = NOW()
        "#,
    )
    .bind(conversation_id)
    .bind(position_id)
    .bind(coords.x)
    .bind(coords.y)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace the cached cluster centroids for a conversation.
pub async fn replace_centroids(
    pool: &PgPool,
    conversation_id: Uuid,
    centroids: &[(i64, Coords)],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM polis_cluster_centroids WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

    for (cluster_id, coords) in centroids {
        sqlx::query(
            r#"
            INSERT INTO polis_cluster_centroids (conversation_id, cluster_id, x, y, updated_time)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(conversation_id)
        .bind(cluster_id)
        .bind(coords.x)
        .bind(coords.y)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Cached cluster centroids for a conversation.
pub async fn fetch_centroids(pool: &PgPool, conversation_id: Uuid) -> Result<Vec<Coords>> {
    let rows = sqlx::query(
        r#"
        SELECT x, y FROM polis_cluster_centroids WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Coords::new(row.get("x"), row.get("y")))
        .collect())
}
