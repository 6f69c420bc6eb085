//! Vote data export for training and weighting
//!
//! Read-side queries against the platform's `positions` and `votes`
//! tables, scoped to one conversation via the comment mapping rows.

use candid_common::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::services::producer::polis_vote_value;

/// One (user, position, value) observation on the external vote scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteTriple {
    pub user_id: Uuid,
    pub position_id: Uuid,
    pub value: i32,
}

/// Vote triples for all positions mapped into a conversation.
///
/// Responses without a directional signal (chat, unknown) are dropped
/// here the same way the producer drops them at enqueue time.
pub async fn fetch_vote_triples(pool: &PgPool, conversation_id: Uuid) -> Result<Vec<VoteTriple>> {
    let rows = sqlx::query(
        r#"
        SELECT v.user_id, v.position_id, v.response
        FROM votes v
        JOIN polis_comment_mappings m ON m.position_id = v.position_id
        WHERE m.conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let response: String = row.get("response");
            polis_vote_value(&response).map(|value| VoteTriple {
                user_id: row.get("user_id"),
                position_id: row.get("position_id"),
                value,
            })
        })
        .collect())
}

/// Timestamp of the newest vote in a conversation, if any.
pub async fn newest_vote_time(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Option<DateTime<Utc>>> {
    let time: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        SELECT MAX(v.created_time)
        FROM votes v
        JOIN polis_comment_mappings m ON m.position_id = v.position_id
        WHERE m.conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_one(pool)
    .await?;
    Ok(time)
}

/// Author of a position (for vote weighting), if the position exists.
pub async fn position_author(pool: &PgPool, position_id: Uuid) -> Result<Option<Uuid>> {
    let author: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT creator_user_id FROM positions WHERE id = $1
        "#,
    )
    .bind(position_id)
    .fetch_optional(pool)
    .await?;
    Ok(author)
}
