//! Matrix factorization training audit trail
//!
//! Append-only: one row per training attempt, success or failure. Rows
//! are never mutated; the latest successful row's timestamp drives the
//! stale check in the training worker.

use candid_common::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// One training attempt record
#[derive(Debug, Clone)]
pub struct TrainingLogEntry {
    pub conversation_id: Uuid,
    pub location_id: Uuid,
    pub category_id: Option<Uuid>,
    pub n_users: i32,
    pub n_comments: i32,
    pub n_votes: i32,
    /// Present on failed attempts; counts are zero in that case
    pub error_message: Option<String>,
}

impl TrainingLogEntry {
    /// Failure row: zero counts plus the error message.
    pub fn failure(
        conversation_id: Uuid,
        location_id: Uuid,
        category_id: Option<Uuid>,
        error: String,
    ) -> Self {
        Self {
            conversation_id,
            location_id,
            category_id,
            n_users: 0,
            n_comments: 0,
            n_votes: 0,
            error_message: Some(error),
        }
    }
}

/// Append one audit row.
pub async fn append(pool: &PgPool, entry: &TrainingLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mf_training_log
            (id, conversation_id, location_id, category_id,
             n_users, n_comments, n_votes, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.conversation_id)
    .bind(entry.location_id)
    .bind(entry.category_id)
    .bind(entry.n_users)
    .bind(entry.n_comments)
    .bind(entry.n_votes)
    .bind(&entry.error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Timestamp of the last successful training run for a conversation.
pub async fn last_success_time(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Option<DateTime<Utc>>> {
    let time: Option<DateTime<Utc>> = sqlx::query_scalar(
        r#"
        SELECT MAX(created_time)
        FROM mf_training_log
        WHERE conversation_id = $1 AND error_message IS NULL
        "#,
    )
    .bind(conversation_id)
    .fetch_one(pool)
    .await?;
    Ok(time)
}
