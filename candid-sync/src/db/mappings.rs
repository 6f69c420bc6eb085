//! Position -> external comment mappings
//!
//! One row per (position, conversation): which external comment a
//! position became in which conversation. The sync worker consults these
//! to skip already-synced targets on retry, and the vote path resolves
//! them to external comment ids.

use candid_common::Result;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// A position's mapping into one conversation, joined with the external
/// conversation id the vote submission needs.
#[derive(Debug, Clone)]
pub struct CommentMapping {
    pub conversation_id: Uuid,
    pub external_conversation_id: String,
    pub external_comment_id: i64,
}

/// Record that a position was synced into a conversation.
pub async fn insert(
    pool: &PgPool,
    position_id: Uuid,
    conversation_id: Uuid,
    external_comment_id: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO polis_comment_mappings (position_id, conversation_id, external_comment_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (position_id, conversation_id) DO NOTHING
        "#,
    )
    .bind(position_id)
    .bind(conversation_id)
    .bind(external_comment_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether a position is already mapped into a conversation.
pub async fn exists(pool: &PgPool, position_id: Uuid, conversation_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM polis_comment_mappings
        WHERE position_id = $1 AND conversation_id = $2
        "#,
    )
    .bind(position_id)
    .bind(conversation_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// All mappings for a position across active conversations.
pub async fn for_position(pool: &PgPool, position_id: Uuid) -> Result<Vec<CommentMapping>> {
    let rows = sqlx::query(
        r#"
        SELECT m.conversation_id, m.external_comment_id, c.external_conversation_id
        FROM polis_comment_mappings m
        JOIN polis_conversations c ON c.id = m.conversation_id
        WHERE m.position_id = $1 AND c.status = 'active'
        "#,
    )
    .bind(position_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CommentMapping {
            conversation_id: row.get("conversation_id"),
            external_conversation_id: row.get("external_conversation_id"),
            external_comment_id: row.get("external_comment_id"),
        })
        .collect())
}
