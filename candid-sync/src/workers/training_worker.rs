//! Matrix factorization training worker
//!
//! Periodically retrains ideological coordinates per active
//! conversation. Only one process trains a given conversation at a time
//! (named advisory lock); conversations without new votes since the last
//! successful run are skipped. Training exceptions become failure audit
//! rows, never worker crashes.

use crate::config::TrainingConfig;
use crate::db::advisory_lock::NamedLockService;
use crate::db::conversations::{self, Conversation};
use crate::db::{coords, training_log, votes};
use crate::services::factorization::{
    FactorizationConfig, FactorizationEngine, TrainingOutcome, VoteObservation,
};
use crate::services::polis_client::{strip_xid, PolisClient};
use crate::workers::{cancellable_sleep, WorkerHandle};
use candid_common::{Coords, Error, Result};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lock name prefix; one lock per conversation
const LOCK_PREFIX: &str = "mf-training";

/// Whether a conversation has votes newer than its last successful
/// training run. A run at the exact newest-vote instant counts as
/// current (`>=`, not `>`).
fn needs_training(
    last_training: Option<chrono::DateTime<Utc>>,
    newest_vote: Option<chrono::DateTime<Utc>>,
) -> bool {
    match (last_training, newest_vote) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(last), Some(newest)) => last < newest,
    }
}

/// Background worker retraining conversation coordinate models
pub struct TrainingWorker {
    pool: PgPool,
    client: Arc<PolisClient>,
    locks: NamedLockService,
    config: TrainingConfig,
}

impl TrainingWorker {
    pub fn new(pool: PgPool, client: Arc<PolisClient>, config: TrainingConfig) -> Self {
        let locks = NamedLockService::new(pool.clone());
        Self {
            pool,
            client,
            locks,
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
        WorkerHandle::new("training-worker", token, handle)
    }

    async fn run(self, token: CancellationToken) {
        info!(
            startup_delay_secs = self.config.startup_delay_secs,
            interval_secs = self.config.interval_secs,
            "Training worker started"
        );

        // Let the database and schema settle before the first pass
        if !cancellable_sleep(&token, Duration::from_secs(self.config.startup_delay_secs)).await {
            info!("Training worker stopped during startup delay");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_secs);

        loop {
            if let Err(e) = self.training_pass(&token).await {
                error!(error = %e, "Training pass failed");
            }

            if !cancellable_sleep(&token, interval).await {
                break;
            }
        }

        info!("Training worker stopped");
    }

    /// One pass over all active conversations.
    async fn training_pass(&self, token: &CancellationToken) -> Result<()> {
        let active = conversations::list_active(&self.pool).await?;
        debug!(conversations = active.len(), "Starting training pass");

        for conversation in active {
            if token.is_cancelled() {
                break;
            }
            self.maybe_train(&conversation).await;
        }

        Ok(())
    }

    /// Train one conversation if the lock and the stale check allow it.
    ///
    /// Never propagates: lock contention and missing data are expected
    /// skips, and a training exception is converted to a failure audit
    /// row.
    async fn maybe_train(&self, conversation: &Conversation) {
        let lock_name = format!("{}:{}", LOCK_PREFIX, conversation.id);

        let guard = match self.locks.try_acquire(&lock_name).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(conversation_id = %conversation.id, "Training lock contended, skipping");
                return;
            }
            Err(e) => {
                warn!(conversation_id = %conversation.id, error = %e, "Lock acquisition failed");
                return;
            }
        };

        let result = self.train_locked(conversation).await;

        // The lock is released whatever happened above
        if let Err(e) = guard.release().await {
            warn!(conversation_id = %conversation.id, error = %e, "Lock release failed");
        }

        if let Err(e) = result {
            error!(conversation_id = %conversation.id, error = %e, "Training failed");
            let entry = training_log::TrainingLogEntry::failure(
                conversation.id,
                conversation.location_id,
                conversation.category_id,
                e.to_string(),
            );
            if let Err(log_err) = training_log::append(&self.pool, &entry).await {
                error!(conversation_id = %conversation.id, error = %log_err, "Failure audit row write failed");
            }
        }
    }

    /// The work done under the lock: stale check, math refresh, fit,
    /// persist.
    async fn train_locked(&self, conversation: &Conversation) -> Result<()> {
        let newest_vote = votes::newest_vote_time(&self.pool, conversation.id).await?;
        let last_training = training_log::last_success_time(&self.pool, conversation.id).await?;
        if !needs_training(last_training, newest_vote) {
            debug!(conversation_id = %conversation.id, "No new votes since last training, skipping");
            return Ok(());
        }

        self.refresh_external_math(conversation).await;

        let triples = votes::fetch_vote_triples(&self.pool, conversation.id).await?;
        let observations: Vec<VoteObservation> = triples
            .iter()
            .map(|t| VoteObservation {
                user_id: t.user_id,
                comment_id: t.position_id,
                value: t.value as f64,
            })
            .collect();

        let pull =
            coords::fetch_coords_by_source(&self.pool, conversation.id, coords::SOURCE_PCA).await?;

        let engine = FactorizationEngine::new(FactorizationConfig {
            learning_rate: self.config.learning_rate,
            l2_lambda: self.config.l2_lambda,
            pull_lambda: self.config.pull_lambda,
            max_epochs: self.config.max_epochs,
            convergence_tol: self.config.convergence_tol,
            min_voters: self.config.min_voters,
            min_votes: self.config.min_votes,
            seed: self.config.seed,
        });

        match engine.train(&observations, &pull) {
            TrainingOutcome::InsufficientData { n_users, n_votes } => {
                // Common for low-activity conversations; no audit row
                debug!(
                    conversation_id = %conversation.id,
                    n_users,
                    n_votes,
                    "Insufficient data for training, skipping"
                );
                Ok(())
            }
            TrainingOutcome::Trained(model) => {
                for (user_id, user_coords) in model.user_coords() {
                    coords::upsert_user_coords(
                        &self.pool,
                        conversation.id,
                        user_id,
                        user_coords,
                        coords::SOURCE_MF,
                    )
                    .await?;
                }
                for (position_id, comment_coords) in model.comment_coords() {
                    coords::upsert_comment_coords(
                        &self.pool,
                        conversation.id,
                        position_id,
                        comment_coords,
                    )
                    .await?;
                }

                let n_users = i32::try_from(model.n_users)
                    .map_err(|_| Error::Internal("user count overflow".to_string()))?;
                let n_comments = i32::try_from(model.n_comments)
                    .map_err(|_| Error::Internal("comment count overflow".to_string()))?;
                let n_votes = i32::try_from(model.n_votes)
                    .map_err(|_| Error::Internal("vote count overflow".to_string()))?;

                training_log::append(
                    &self.pool,
                    &training_log::TrainingLogEntry {
                        conversation_id: conversation.id,
                        location_id: conversation.location_id,
                        category_id: conversation.category_id,
                        n_users,
                        n_comments,
                        n_votes,
                        error_message: None,
                    },
                )
                .await?;

                info!(
                    conversation_id = %conversation.id,
                    n_users = model.n_users,
                    n_votes = model.n_votes,
                    epochs = model.epochs_run,
                    final_loss = model.final_loss,
                    "Training completed"
                );
                Ok(())
            }
        }
    }

    /// Pull fresh clustering math from the external service: cluster
    /// centroids for weight normalization and per-user PCA coordinates
    /// as training anchors. Unreachable math degrades to the cached
    /// state rather than failing the run.
    async fn refresh_external_math(&self, conversation: &Conversation) {
        let math = match self
            .client
            .fetch_math(&conversation.external_conversation_id)
            .await
        {
            Ok(math) => math,
            Err(e) => {
                warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "External math fetch failed, training with cached coordinates"
                );
                return;
            }
        };

        if !math.clusters.is_empty() {
            let centroids: Vec<(i64, Coords)> = math
                .clusters
                .iter()
                .map(|c| (c.id, c.center_coords()))
                .collect();
            if let Err(e) = coords::replace_centroids(&self.pool, conversation.id, &centroids).await
            {
                warn!(conversation_id = %conversation.id, error = %e, "Centroid cache update failed");
            }
        }

        for (xid, point) in &math.user_coords {
            let user_str = strip_xid(xid);
            let Ok(user_id) = Uuid::parse_str(&user_str) else {
                debug!(xid = %xid, "Skipping unparseable xid in math payload");
                continue;
            };
            if let Err(e) = coords::upsert_user_coords(
                &self.pool,
                conversation.id,
                user_id,
                Coords::new(point[0], point[1]),
                coords::SOURCE_PCA,
            )
            .await
            {
                warn!(conversation_id = %conversation.id, error = %e, "PCA coordinate update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, hour, 0, 0).unwrap()
    }

    #[test]
    fn no_votes_means_no_training() {
        assert!(!needs_training(None, None));
        assert!(!needs_training(Some(at(10)), None));
    }

    #[test]
    fn first_vote_triggers_training() {
        assert!(needs_training(None, Some(at(9))));
    }

    #[test]
    fn stale_check_skips_when_training_is_newer() {
        // Training at 10:00, newest vote at 09:00: nothing new
        assert!(!needs_training(Some(at(10)), Some(at(9))));
    }

    #[test]
    fn stale_check_is_inclusive_at_equality() {
        assert!(!needs_training(Some(at(9)), Some(at(9))));
    }

    #[test]
    fn newer_vote_triggers_retraining() {
        assert!(needs_training(Some(at(9)), Some(at(10))));
    }
}
