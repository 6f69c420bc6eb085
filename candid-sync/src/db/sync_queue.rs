//! Durable sync queue storage
//!
//! At-least-once work queue backed by `polis_sync_queue`. Producers
//! insert `pending` rows; workers claim batches with row-locking
//! skip-locked semantics so concurrent processes never double-claim,
//! then resolve each item to `completed`, `partial` (claimable again),
//! `pending` (retry with backoff), or terminal `failed`.

use candid_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Queue operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Position,
    Vote,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Position => "position",
            OperationType::Vote => "vote",
        }
    }
}

/// Payload for syncing a position as an external comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSyncPayload {
    pub position_id: Uuid,
    pub statement: String,
    pub category_id: Option<Uuid>,
    pub location_id: Uuid,
    pub creator_user_id: Uuid,
}

/// Payload for syncing a vote to the external system
///
/// `polis_vote` carries the already-mapped external scale value so the
/// worker never re-interprets response strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteSyncPayload {
    pub position_id: Uuid,
    pub user_id: Uuid,
    pub response: String,
    pub polis_vote: i32,
}

/// Tagged queue payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncPayload {
    Position(PositionSyncPayload),
    Vote(VoteSyncPayload),
}

impl SyncPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            SyncPayload::Position(_) => OperationType::Position,
            SyncPayload::Vote(_) => OperationType::Vote,
        }
    }
}

/// A claimed queue item
#[derive(Debug, Clone)]
pub struct SyncQueueItem {
    pub id: Uuid,
    pub payload: SyncPayload,
    /// Retry count as of this claim (0 on first attempt)
    pub retry_count: i32,
}

/// Per-status item counts for monitoring
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub partial: i64,
    pub total: i64,
}

/// Retry/backoff policy
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay, doubled per retry
    pub base: Duration,
    /// Floor applied when the external service itself is down
    pub long_floor: Duration,
    /// Retry budget; reaching it marks the item terminally failed
    pub max_retries: i32,
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the retry count *after* the
    /// current failure (first failure passes 1).
    ///
    /// `base * 2^(retry_count - 1)`, floored at `long_floor` when the
    /// failure indicates the whole external service is down.
    pub fn delay(&self, retry_count: i32, force_long_backoff: bool) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 16) as u32;
        let delay = self.base.saturating_mul(2_u32.saturating_pow(exponent));
        if force_long_backoff {
            delay.max(self.long_floor)
        } else {
            delay
        }
    }

    /// Whether this retry count exhausts the budget.
    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_retries
    }
}

/// Durable queue store over `polis_sync_queue`
#[derive(Clone)]
pub struct SyncQueueStore {
    pool: PgPool,
    policy: BackoffPolicy,
}

impl SyncQueueStore {
    pub fn new(pool: PgPool, policy: BackoffPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Insert a new pending item. Returns the item id.
    pub async fn enqueue(&self, payload: &SyncPayload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(payload)
            .map_err(|e| Error::Internal(format!("Payload serialization failed: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO polis_sync_queue (id, operation_type, payload, status, retry_count, next_retry_time)
            VALUES ($1, $2, $3, 'pending', 0, NOW())
            "#,
        )
        .bind(id)
        .bind(payload.operation_type().as_str())
        .bind(json)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Atomically claim up to `limit` due items, oldest first.
    ///
    /// `FOR UPDATE SKIP LOCKED` inside the claim transaction means
    /// concurrent workers partition the queue without double-claiming.
    /// Rows whose payload no longer deserializes are marked terminally
    /// failed instead of poisoning the batch.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<SyncQueueItem>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, payload, retry_count
            FROM polis_sync_queue
            WHERE status IN ('pending', 'partial')
              AND next_retry_time <= NOW()
            ORDER BY created_time
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.get::<Uuid, _>("id")).collect();

        sqlx::query(
            r#"
            UPDATE polis_sync_queue
            SET status = 'processing', updated_time = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut corrupt: Vec<Uuid> = Vec::new();

        for row in rows {
            let id: Uuid = row.get("id");
            let raw: serde_json::Value = row.get("payload");
            let retry_count: i32 = row.get("retry_count");

            match serde_json::from_value::<SyncPayload>(raw) {
                Ok(payload) => items.push(SyncQueueItem {
                    id,
                    payload,
                    retry_count,
                }),
                Err(e) => {
                    warn!(item_id = %id, error = %e, "Unreadable queue payload, failing item");
                    corrupt.push(id);
                }
            }
        }

        for id in corrupt {
            self.mark_terminally_failed(id, "payload deserialization failed")
                .await?;
        }

        Ok(items)
    }

    /// Resolve an item as completed. An optional note records a warning
    /// from a partial-success-but-terminal outcome.
    pub async fn mark_completed(&self, id: Uuid, note: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE polis_sync_queue
            SET status = 'completed', error_message = $2, next_retry_time = NOW(), updated_time = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve an item as failed for this attempt.
    ///
    /// `retry_count` is the count including this failure. Budget
    /// exhausted: terminal `failed`. Otherwise the item returns to
    /// `pending` with exponential backoff, floored when the external
    /// service is flagged down.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: i32,
        error: &str,
        force_long_backoff: bool,
    ) -> Result<()> {
        self.resolve_retryable(id, retry_count, error, force_long_backoff, "pending")
            .await
    }

    /// Resolve an item whose sub-steps partially succeeded.
    ///
    /// Same backoff and budget rules as `mark_failed`, but the item is
    /// left in `partial` so monitoring can distinguish it; partial items
    /// are claimable again alongside pending ones.
    pub async fn mark_partial(&self, id: Uuid, retry_count: i32, error: &str) -> Result<()> {
        self.resolve_retryable(id, retry_count, error, false, "partial").await
    }

    async fn resolve_retryable(
        &self,
        id: Uuid,
        retry_count: i32,
        error: &str,
        force_long_backoff: bool,
        retry_status: &str,
    ) -> Result<()> {
        if self.policy.is_exhausted(retry_count) {
            return self.mark_terminally_failed(id, error).await;
        }

        let delay = self.policy.delay(retry_count, force_long_backoff);
        let next_retry: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| Error::Internal(format!("Backoff out of range: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE polis_sync_queue
            SET status = $2, retry_count = $3, error_message = $4,
                next_retry_time = $5, updated_time = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(retry_status)
        .bind(retry_count)
        .bind(error)
        .bind(next_retry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_terminally_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE polis_sync_queue
            SET status = 'failed', error_message = $2, updated_time = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Manually return a terminally failed item to the queue.
    pub async fn requeue_failed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE polis_sync_queue
            SET status = 'pending', retry_count = 0, error_message = NULL,
                next_retry_time = NOW(), updated_time = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Item counts per status.
    pub async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM polis_sync_queue
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            stats.total += count;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                "partial" => stats.partial = count,
                other => warn!(status = other, count, "Unknown queue status in stats"),
            }
        }
        Ok(stats)
    }

    /// Delete completed items past retention. Returns the number of rows
    /// actually deleted.
    pub async fn cleanup_completed(&self, older_than_days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM polis_sync_queue
            WHERE status = 'completed'
              AND updated_time < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(30),
            long_floor: Duration::from_secs(300),
            max_retries: 5,
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let p = policy();
        assert_eq!(p.delay(1, false), Duration::from_secs(30));
        assert_eq!(p.delay(2, false), Duration::from_secs(60));
        assert_eq!(p.delay(3, false), Duration::from_secs(120));
        assert_eq!(p.delay(4, false), Duration::from_secs(240));
    }

    #[test]
    fn backoff_strictly_increases_until_terminal() {
        let p = policy();
        let mut last = Duration::ZERO;
        for retry in 1..p.max_retries {
            let d = p.delay(retry, false);
            assert!(d > last, "backoff did not increase at retry {}", retry);
            last = d;
        }
    }

    #[test]
    fn long_backoff_applies_floor() {
        let p = policy();
        // Early retries land below the floor and get raised to it
        assert_eq!(p.delay(1, true), Duration::from_secs(300));
        assert_eq!(p.delay(2, true), Duration::from_secs(300));
        // Once the exponential curve passes the floor, it wins
        assert_eq!(p.delay(4, true), Duration::from_secs(300));
        assert_eq!(p.delay(5, true), Duration::from_secs(480));
    }

    #[test]
    fn budget_exhaustion_boundary() {
        let p = policy();
        assert!(!p.is_exhausted(4));
        assert!(p.is_exhausted(5));
        assert!(p.is_exhausted(6));
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = SyncPayload::Vote(VoteSyncPayload {
            position_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            response: "agree".to_string(),
            polis_vote: -1,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "vote");
        assert_eq!(json["polis_vote"], -1);

        let back: SyncPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn position_payload_round_trips() {
        let payload = SyncPayload::Position(PositionSyncPayload {
            position_id: Uuid::new_v4(),
            statement: "More bike lanes downtown".to_string(),
            category_id: None,
            location_id: Uuid::new_v4(),
            creator_user_id: Uuid::new_v4(),
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "position");
        assert!(json["category_id"].is_null());

        let back: SyncPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.operation_type(), OperationType::Position);
    }
}
