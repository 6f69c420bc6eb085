//! Sync queue producers
//!
//! The interface the REST controllers call when a position or vote is
//! created. Producers never fail the user-facing request: a disabled
//! subsystem or a queue insert error yields `false`, not an error.

use crate::db::sync_queue::{
    PositionSyncPayload, SyncPayload, SyncQueueStore, VoteSyncPayload,
};
use tracing::warn;
use uuid::Uuid;

/// External vote scale: agreement is negative on the Polis axis.
pub const POLIS_AGREE: i32 = -1;
pub const POLIS_DISAGREE: i32 = 1;
pub const POLIS_PASS: i32 = 0;

/// Map a platform response type to the external vote scale.
///
/// `chat` and unrecognized responses carry no directional opinion signal
/// and map to `None` (not queued).
pub fn polis_vote_value(response: &str) -> Option<i32> {
    match response {
        "agree" => Some(POLIS_AGREE),
        "disagree" => Some(POLIS_DISAGREE),
        "pass" => Some(POLIS_PASS),
        _ => None,
    }
}

/// Build a vote payload, or `None` for responses that are not synced.
pub fn build_vote_payload(
    position_id: Uuid,
    user_id: Uuid,
    response: &str,
) -> Option<VoteSyncPayload> {
    polis_vote_value(response).map(|polis_vote| VoteSyncPayload {
        position_id,
        user_id,
        response: response.to_string(),
        polis_vote,
    })
}

/// Queue producer handed to the REST layer
#[derive(Clone)]
pub struct SyncQueueProducer {
    store: SyncQueueStore,
    enabled: bool,
}

impl SyncQueueProducer {
    pub fn new(store: SyncQueueStore, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// Enqueue a position for external sync. Returns whether an item was
    /// enqueued.
    pub async fn queue_position_sync(
        &self,
        position_id: Uuid,
        statement: &str,
        category_id: Option<Uuid>,
        location_id: Uuid,
        creator_user_id: Uuid,
    ) -> bool {
        if !self.enabled {
            return false;
        }

        let payload = SyncPayload::Position(PositionSyncPayload {
            position_id,
            statement: statement.to_string(),
            category_id,
            location_id,
            creator_user_id,
        });

        match self.store.enqueue(&payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!(position_id = %position_id, error = %e, "Failed to enqueue position sync");
                false
            }
        }
    }

    /// Enqueue a vote for external sync. Returns whether an item was
    /// enqueued; non-directional responses (chat) are skipped.
    pub async fn queue_vote_sync(&self, position_id: Uuid, user_id: Uuid, response: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let Some(payload) = build_vote_payload(position_id, user_id, response) else {
            return false;
        };

        match self.store.enqueue(&SyncPayload::Vote(payload)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(position_id = %position_id, error = %e, "Failed to enqueue vote sync");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_scale_is_fixed() {
        assert_eq!(polis_vote_value("agree"), Some(-1));
        assert_eq!(polis_vote_value("disagree"), Some(1));
        assert_eq!(polis_vote_value("pass"), Some(0));
    }

    #[test]
    fn chat_and_unknown_are_skipped() {
        assert_eq!(polis_vote_value("chat"), None);
        assert_eq!(polis_vote_value(""), None);
        assert_eq!(polis_vote_value("AGREE"), None);
        assert_eq!(polis_vote_value("upvote"), None);
    }

    #[test]
    fn agree_payload_serializes_polis_vote() {
        let payload = build_vote_payload(Uuid::new_v4(), Uuid::new_v4(), "agree").unwrap();
        assert_eq!(payload.polis_vote, -1);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["polis_vote"], -1);
        assert_eq!(json["response"], "agree");
    }

    #[test]
    fn chat_builds_no_payload() {
        assert!(build_vote_payload(Uuid::new_v4(), Uuid::new_v4(), "chat").is_none());
    }
}
