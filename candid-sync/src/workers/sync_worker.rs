//! Polis sync queue worker
//!
//! Drains the durable queue: claim a batch, dispatch each item to the
//! external service, resolve to completed / partial / retry / failed.
//! A non-empty batch re-polls immediately; an empty one sleeps the poll
//! interval. Top-of-iteration errors are logged and never kill the loop.

use crate::config::WorkerConfig;
use crate::db::sync_queue::{
    PositionSyncPayload, SyncPayload, SyncQueueItem, SyncQueueStore, VoteSyncPayload,
};
use crate::db::{conversations, coords, mappings, votes};
use crate::services::polis_client::PolisClient;
use crate::workers::{cancellable_sleep, WorkerHandle};
use candid_common::weighting;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resolution of one processed item
#[derive(Debug)]
enum SyncOutcome {
    /// Fully synced; optional warning note recorded with the completion
    Completed(Option<String>),
    /// Some targets synced, some failed; claimable again
    Partial(String),
    /// Nothing synced this attempt
    Failed { error: String, long_backoff: bool },
}

/// Background worker draining the sync queue
pub struct SyncWorker {
    pool: PgPool,
    store: SyncQueueStore,
    client: Arc<PolisClient>,
    config: WorkerConfig,
}

impl SyncWorker {
    pub fn new(
        pool: PgPool,
        store: SyncQueueStore,
        client: Arc<PolisClient>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            store,
            client,
            config,
        }
    }

    /// Start the worker loop. Returns a handle for shutdown.
    pub fn start(self) -> WorkerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            self.run(child).await;
        });
        WorkerHandle::new("sync-worker", token, handle)
    }

    async fn run(self, token: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "Sync worker started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let mut cleanup_countdown: u32 = 0;

        while !token.is_cancelled() {
            let processed = match self.poll_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Sync worker iteration failed");
                    0
                }
            };

            // Piggyback retention cleanup on idle polls, roughly hourly
            if processed == 0 {
                if cleanup_countdown == 0 {
                    cleanup_countdown = (3600 / self.config.poll_interval_secs.max(1)) as u32;
                    match self
                        .store
                        .cleanup_completed(self.config.cleanup_retention_days)
                        .await
                    {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "Cleaned up completed queue items"),
                        Err(e) => warn!(error = %e, "Queue cleanup failed"),
                    }
                } else {
                    cleanup_countdown -= 1;
                }

                if !cancellable_sleep(&token, poll_interval).await {
                    break;
                }
            }
            // Drain: items were processed, poll again immediately
        }

        info!("Sync worker stopped");
    }

    /// Claim and process one batch. Returns the number of items handled.
    ///
    /// Cancellation is checked at poll boundaries only: a claimed batch
    /// is always drained so no item is left leased in `processing`.
    async fn poll_once(&self) -> candid_common::Result<usize> {
        let batch = self.store.claim_batch(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        debug!(batch_size = batch.len(), "Claimed sync batch");

        let mut processed = 0;
        for item in batch {
            let item_id = item.id;
            if let Err(e) = self.process_item(item).await {
                // Resolution write failed; the item stays visible in
                // `processing` via queue stats. Keep draining the batch.
                error!(item_id = %item_id, error = %e, "Queue item resolution failed");
            }
            processed += 1;
        }

        Ok(processed)
    }

    async fn process_item(&self, item: SyncQueueItem) -> candid_common::Result<()> {
        let outcome = match &item.payload {
            SyncPayload::Position(payload) => self.sync_position(payload).await,
            SyncPayload::Vote(payload) => self.sync_vote(payload).await,
        };

        match outcome {
            SyncOutcome::Completed(note) => {
                if let Some(ref warning) = note {
                    warn!(item_id = %item.id, warning = %warning, "Sync completed with warning");
                }
                self.store.mark_completed(item.id, note.as_deref()).await
            }
            SyncOutcome::Partial(error) => {
                warn!(item_id = %item.id, error = %error, "Sync partially succeeded");
                self.store
                    .mark_partial(item.id, item.retry_count + 1, &error)
                    .await
            }
            SyncOutcome::Failed {
                error,
                long_backoff,
            } => {
                warn!(
                    item_id = %item.id,
                    error = %error,
                    long_backoff,
                    "Sync failed"
                );
                self.store
                    .mark_failed(item.id, item.retry_count + 1, &error, long_backoff)
                    .await
            }
        }
    }

    /// Sync a position into every conversation covering it: the
    /// (location, category) conversation and the location-wide one.
    /// Targets already mapped are skipped, which makes partial retries
    /// converge.
    async fn sync_position(&self, payload: &PositionSyncPayload) -> SyncOutcome {
        let today = Utc::now().date_naive();

        let mut targets = Vec::new();
        if payload.category_id.is_some() {
            match conversations::find_active_for(
                &self.pool,
                payload.location_id,
                payload.category_id,
                today,
            )
            .await
            {
                Ok(Some(conversation)) => targets.push(conversation),
                Ok(None) => {}
                Err(e) => {
                    return SyncOutcome::Failed {
                        error: format!("conversation lookup failed: {}", e),
                        long_backoff: false,
                    }
                }
            }
        }
        match conversations::find_active_for(&self.pool, payload.location_id, None, today).await {
            Ok(Some(conversation)) => targets.push(conversation),
            Ok(None) => {}
            Err(e) => {
                return SyncOutcome::Failed {
                    error: format!("conversation lookup failed: {}", e),
                    long_backoff: false,
                }
            }
        }

        if targets.is_empty() {
            // The scheduler may not have opened this month's window yet;
            // retry on the normal curve.
            return SyncOutcome::Failed {
                error: "no active conversation for position".to_string(),
                long_backoff: false,
            };
        }

        let xid = self.client.xid_for_user(payload.creator_user_id).await;

        let mut synced = 0usize;
        let mut skipped = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut long_backoff = false;

        for conversation in &targets {
            match mappings::exists(&self.pool, payload.position_id, conversation.id).await {
                Ok(true) => {
                    skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    errors.push(format!("mapping lookup failed: {}", e));
                    continue;
                }
            }

            match self
                .client
                .submit_comment(
                    &conversation.external_conversation_id,
                    &xid,
                    &payload.statement,
                )
                .await
            {
                Ok(tid) => {
                    if let Err(e) =
                        mappings::insert(&self.pool, payload.position_id, conversation.id, tid)
                            .await
                    {
                        errors.push(format!("mapping save failed: {}", e));
                        continue;
                    }
                    synced += 1;
                }
                Err(e) => {
                    long_backoff |= e.wants_long_backoff();
                    errors.push(e.to_string());
                }
            }
        }

        if errors.is_empty() {
            let note = (skipped > 0).then(|| format!("{} target(s) already synced", skipped));
            SyncOutcome::Completed(note)
        } else if synced > 0 || skipped > 0 {
            SyncOutcome::Partial(errors.join("; "))
        } else {
            SyncOutcome::Failed {
                error: errors.join("; "),
                long_backoff,
            }
        }
    }

    /// Submit a weighted vote to every conversation the position maps
    /// into. Vote submission is idempotent upstream (latest vote wins),
    /// so retries resubmit all targets.
    async fn sync_vote(&self, payload: &VoteSyncPayload) -> SyncOutcome {
        let targets = match mappings::for_position(&self.pool, payload.position_id).await {
            Ok(targets) => targets,
            Err(e) => {
                return SyncOutcome::Failed {
                    error: format!("mapping lookup failed: {}", e),
                    long_backoff: false,
                }
            }
        };

        if targets.is_empty() {
            // Position not yet synced; retry after its item lands.
            return SyncOutcome::Failed {
                error: "position has no synced comment yet".to_string(),
                long_backoff: false,
            };
        }

        let xid = self.client.xid_for_user(payload.user_id).await;

        let mut synced = 0usize;
        let mut errors: Vec<String> = Vec::new();
        let mut long_backoff = false;

        for mapping in &targets {
            let weight = self
                .vote_weight_for(payload, mapping.conversation_id)
                .await;

            match self
                .client
                .submit_vote(
                    &mapping.external_conversation_id,
                    &xid,
                    mapping.external_comment_id,
                    payload.polis_vote,
                    Some(weight),
                )
                .await
            {
                Ok(()) => synced += 1,
                Err(e) => {
                    long_backoff |= e.wants_long_backoff();
                    errors.push(e.to_string());
                }
            }
        }

        if errors.is_empty() {
            SyncOutcome::Completed(None)
        } else if synced > 0 {
            SyncOutcome::Partial(errors.join("; "))
        } else {
            SyncOutcome::Failed {
                error: errors.join("; "),
                long_backoff,
            }
        }
    }

    /// Ideological-distance weight for a vote within one conversation.
    /// Any lookup failure degrades to the baseline weight; weighting
    /// must never block a sync.
    async fn vote_weight_for(&self, payload: &VoteSyncPayload, conversation_id: uuid::Uuid) -> f64 {
        let voter =
            match coords::fetch_user_coords(&self.pool, conversation_id, payload.user_id).await {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "Voter coordinate lookup failed, using baseline weight");
                    None
                }
            };

        let author = match votes::position_author(&self.pool, payload.position_id).await {
            Ok(Some(author_id)) => {
                match coords::fetch_user_coords(&self.pool, conversation_id, author_id).await {
                    Ok(a) => a,
                    Err(_) => None,
                }
            }
            _ => None,
        };

        let centroids = coords::fetch_centroids(&self.pool, conversation_id)
            .await
            .unwrap_or_default();
        let max_distance = weighting::compute_max_distance(&centroids);

        weighting::vote_weight(voter, author, max_distance)
    }
}
