//! Conversation mirror persistence
//!
//! Local rows mirroring external conversations. Conversations are never
//! deleted (historical reference); expiry only flips status, and cleanup
//! prunes the dependent mapping rows.

use candid_common::{Error, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Conversation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationType {
    /// One (location, category) pair
    Category,
    /// All categories within a location
    LocationAll,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Category => "category",
            ConversationType::LocationAll => "location_all",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "category" => Ok(ConversationType::Category),
            "location_all" => Ok(ConversationType::LocationAll),
            other => Err(Error::Internal(format!(
                "Unknown conversation type: {}",
                other
            ))),
        }
    }
}

/// Local mirror of an external conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub location_id: Uuid,
    pub category_id: Option<Uuid>,
    pub external_conversation_id: String,
    pub conversation_type: ConversationType,
    pub active_from: NaiveDate,
    pub active_until: NaiveDate,
}

impl Conversation {
    /// New active conversation for a month window.
    pub fn new(
        location_id: Uuid,
        category_id: Option<Uuid>,
        external_conversation_id: String,
        window: (NaiveDate, NaiveDate),
    ) -> Self {
        let conversation_type = if category_id.is_some() {
            ConversationType::Category
        } else {
            ConversationType::LocationAll
        };
        Self {
            id: Uuid::new_v4(),
            location_id,
            category_id,
            external_conversation_id,
            conversation_type,
            active_from: window.0,
            active_until: window.1,
        }
    }
}

fn row_to_conversation(row: &sqlx::postgres::PgRow) -> Result<Conversation> {
    let type_str: String = row.get("conversation_type");
    Ok(Conversation {
        id: row.get("id"),
        location_id: row.get("location_id"),
        category_id: row.get("category_id"),
        external_conversation_id: row.get("external_conversation_id"),
        conversation_type: ConversationType::parse(&type_str)?,
        active_from: row.get("active_from"),
        active_until: row.get("active_until"),
    })
}

/// Insert a new conversation row.
pub async fn insert(pool: &PgPool, conversation: &Conversation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO polis_conversations
            (id, location_id, category_id, external_conversation_id,
             conversation_type, active_from, active_until, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')
        "#,
    )
    .bind(conversation.id)
    .bind(conversation.location_id)
    .bind(conversation.category_id)
    .bind(&conversation.external_conversation_id)
    .bind(conversation.conversation_type.as_str())
    .bind(conversation.active_from)
    .bind(conversation.active_until)
    .execute(pool)
    .await?;
    Ok(())
}

/// All currently active conversations.
pub async fn list_active(pool: &PgPool) -> Result<Vec<Conversation>> {
    let rows = sqlx::query(
        r#"
        SELECT id, location_id, category_id, external_conversation_id,
               conversation_type, active_from, active_until
        FROM polis_conversations
        WHERE status = 'active'
        ORDER BY active_from, location_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_conversation).collect()
}

/// The active conversation covering (location, category) on a given date,
/// if one exists. `category_id = None` selects the location-wide
/// conversation.
pub async fn find_active_for(
    pool: &PgPool,
    location_id: Uuid,
    category_id: Option<Uuid>,
    on: NaiveDate,
) -> Result<Option<Conversation>> {
    let row = sqlx::query(
        r#"
        SELECT id, location_id, category_id, external_conversation_id,
               conversation_type, active_from, active_until
        FROM polis_conversations
        WHERE status = 'active'
          AND location_id = $1
          AND category_id IS NOT DISTINCT FROM $2
          AND active_from <= $3
          AND active_until >= $3
        "#,
    )
    .bind(location_id)
    .bind(category_id)
    .bind(on)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_conversation).transpose()
}

/// Whether an active conversation already exists for the exact window
/// start.
pub async fn exists_for_window(
    pool: &PgPool,
    location_id: Uuid,
    category_id: Option<Uuid>,
    window_start: NaiveDate,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM polis_conversations
        WHERE status = 'active'
          AND location_id = $1
          AND category_id IS NOT DISTINCT FROM $2
          AND active_from = $3
        "#,
    )
    .bind(location_id)
    .bind(category_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Bulk-expire conversations whose window has closed. The external
/// record is left untouched. Returns the number of rows transitioned.
pub async fn expire_until(pool: &PgPool, today: NaiveDate) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE polis_conversations
        SET status = 'expired'
        WHERE status = 'active' AND active_until <= $1
        "#,
    )
    .bind(today)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// (location, category) pairs with position activity since the given
/// date, plus one location-only entry per active location.
pub async fn list_activity_keys(
    pool: &PgPool,
    since: NaiveDate,
) -> Result<Vec<(Uuid, Option<Uuid>)>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT location_id, category_id
        FROM positions
        WHERE created_time >= $1 AND category_id IS NOT NULL
        UNION
        SELECT DISTINCT location_id, NULL::uuid
        FROM positions
        WHERE created_time >= $1
        ORDER BY location_id, category_id
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("location_id"), row.get("category_id")))
        .collect())
}

/// Prune cached mapping rows for conversations expired before the cutoff
/// date. Conversation rows themselves are preserved. Returns the number
/// of mapping rows deleted.
pub async fn prune_expired_mappings(pool: &PgPool, expired_before: NaiveDate) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM polis_comment_mappings m
        USING polis_conversations c
        WHERE m.conversation_id = c.id
          AND c.status = 'expired'
          AND c.active_until < $1
        "#,
    )
    .bind(expired_before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_type_round_trips() {
        for t in [ConversationType::Category, ConversationType::LocationAll] {
            assert_eq!(ConversationType::parse(t.as_str()).unwrap(), t);
        }
        assert!(ConversationType::parse("bogus").is_err());
    }

    #[test]
    fn new_conversation_infers_type_from_category() {
        let window = (
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 31).unwrap(),
        );
        let with_category =
            Conversation::new(Uuid::new_v4(), Some(Uuid::new_v4()), "ext-1".into(), window);
        assert_eq!(with_category.conversation_type, ConversationType::Category);

        let location_wide = Conversation::new(Uuid::new_v4(), None, "ext-2".into(), window);
        assert_eq!(
            location_wide.conversation_type,
            ConversationType::LocationAll
        );
    }
}
