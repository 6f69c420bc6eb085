//! Conversation lifecycle scheduler
//!
//! Daily pass over conversation windows: expire closed windows, open the
//! current month's conversations for every (location, category) pair and
//! location with recent activity, and prune cached mapping rows for
//! long-expired conversations. Per-item errors accumulate; one bad
//! combination never aborts the batch.

use crate::config::WorkerConfig;
use crate::db::conversations::{self, Conversation};
use crate::services::polis_client::PolisClient;
use crate::workers::{cancellable_sleep, WorkerHandle};
use candid_common::Result;
use chrono::{Datelike, Months, NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Trailing window of position activity that justifies a new
/// conversation
const ACTIVITY_MONTHS: u32 = 6;

/// Month window (first day, last day) containing the given date.
pub fn month_window(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date.with_day(1).unwrap_or(date);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start);
    (start, end)
}

/// Summary of one scheduler pass
#[derive(Debug, Default)]
pub struct SchedulerPassSummary {
    pub expired: u64,
    pub created: usize,
    pub pruned_mappings: u64,
    pub errors: Vec<String>,
}

/// Conversation lifecycle scheduler
pub struct ConversationScheduler {
    pool: PgPool,
    client: Arc<PolisClient>,
    config: WorkerConfig,
}

impl ConversationScheduler {
    pub fn new(pool: PgPool, client: Arc<PolisClient>, config: WorkerConfig) -> Self {
        Self {
            pool,
            client,
            config,
        }
    }

    /// Start the scheduler loop. Returns a handle for shutdown.
    pub fn start(self) -> WorkerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            self.run(child).await;
        });
        WorkerHandle::new("conversation-scheduler", token, handle)
    }

    async fn run(self, token: CancellationToken) {
        info!(
            tick_secs = self.config.scheduler_tick_secs,
            "Conversation scheduler started"
        );

        let tick = Duration::from_secs(self.config.scheduler_tick_secs);

        loop {
            match self.run_pass().await {
                Ok(summary) => {
                    info!(
                        expired = summary.expired,
                        created = summary.created,
                        pruned_mappings = summary.pruned_mappings,
                        errors = summary.errors.len(),
                        "Scheduler pass completed"
                    );
                    for e in &summary.errors {
                        warn!(error = %e, "Scheduler pass item failed");
                    }
                }
                Err(e) => error!(error = %e, "Scheduler pass failed"),
            }

            if !cancellable_sleep(&token, tick).await {
                break;
            }
        }

        info!("Conversation scheduler stopped");
    }

    /// One full lifecycle pass: expire, create, prune.
    pub async fn run_pass(&self) -> Result<SchedulerPassSummary> {
        let today = Utc::now().date_naive();
        let mut summary = SchedulerPassSummary {
            expired: self.expire_old_conversations(today).await?,
            ..SchedulerPassSummary::default()
        };

        let (created, errors) = self.create_monthly_conversations(today).await?;
        summary.created = created;
        summary.errors = errors;

        summary.pruned_mappings = self.cleanup_expired_data(today).await?;

        Ok(summary)
    }

    /// Transition conversations whose window closed to expired. The
    /// external record is preserved for historical access.
    pub async fn expire_old_conversations(&self, today: NaiveDate) -> Result<u64> {
        conversations::expire_until(&self.pool, today).await
    }

    /// Open the current month's conversations for every combination
    /// with trailing activity. Returns (created count, per-item errors).
    pub async fn create_monthly_conversations(
        &self,
        today: NaiveDate,
    ) -> Result<(usize, Vec<String>)> {
        let window = month_window(today);
        let since = today
            .checked_sub_months(Months::new(ACTIVITY_MONTHS))
            .unwrap_or(today);

        let keys = conversations::list_activity_keys(&self.pool, since).await?;

        let mut created = 0;
        let mut errors = Vec::new();

        for (location_id, category_id) in keys {
            match self
                .create_one(location_id, category_id, window, today)
                .await
            {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => errors.push(format!(
                    "location {} category {:?}: {}",
                    location_id, category_id, e
                )),
            }
        }

        Ok((created, errors))
    }

    /// Create one conversation unless its window already exists.
    async fn create_one(
        &self,
        location_id: Uuid,
        category_id: Option<Uuid>,
        window: (NaiveDate, NaiveDate),
        today: NaiveDate,
    ) -> Result<bool> {
        if conversations::exists_for_window(&self.pool, location_id, category_id, window.0).await? {
            return Ok(false);
        }

        let topic = match category_id {
            Some(category) => format!(
                "Deliberation {}-{:02} / location {} / category {}",
                today.year(),
                today.month(),
                location_id,
                category
            ),
            None => format!(
                "Deliberation {}-{:02} / location {} / all categories",
                today.year(),
                today.month(),
                location_id
            ),
        };

        let external_id = self
            .client
            .create_conversation(&topic, "Monthly opinion window")
            .await
            .map_err(|e| candid_common::Error::Internal(e.to_string()))?;

        let conversation = Conversation::new(location_id, category_id, external_id, window);
        conversations::insert(&self.pool, &conversation).await?;

        info!(
            conversation_id = %conversation.id,
            location_id = %location_id,
            category_id = ?category_id,
            "Created monthly conversation"
        );

        Ok(true)
    }

    /// Prune cached mapping rows for conversations expired more than the
    /// configured number of days. Conversation rows stay.
    pub async fn cleanup_expired_data(&self, today: NaiveDate) -> Result<u64> {
        let cutoff = today - chrono::Duration::days(self.config.cleanup_days_after_expiry as i64);
        conversations::prune_expired_mappings(&self.pool, cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_window_spans_whole_month() {
        let (start, end) = month_window(NaiveDate::from_ymd_opt(2026, 8, 7).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 8, 31).unwrap());
    }

    #[test]
    fn month_window_handles_february() {
        let (start, end) = month_window(NaiveDate::from_ymd_opt(2027, 2, 15).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2027, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2027, 2, 28).unwrap());

        // Leap year
        let (_, leap_end) = month_window(NaiveDate::from_ymd_opt(2028, 2, 1).unwrap());
        assert_eq!(leap_end, NaiveDate::from_ymd_opt(2028, 2, 29).unwrap());
    }

    #[test]
    fn month_window_handles_december() {
        let (start, end) = month_window(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
    }
}
