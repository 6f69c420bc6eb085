//! Background workers
//!
//! One tokio task per worker type, owned by the application's top-level
//! lifecycle: constructed at startup, stopped at shutdown through an
//! explicit handle. Cancellation is cooperative; workers check the token
//! at loop and sleep boundaries, never mid-request.

pub mod scheduler;
pub mod sync_worker;
pub mod training_worker;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Bound on how long shutdown waits for a worker to finish its current
/// iteration
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running background worker
pub struct WorkerHandle {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            name,
            token,
            handle,
        }
    }

    /// Signal the worker to stop and wait (bounded) for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.handle)
            .await
            .is_err()
        {
            warn!(worker = self.name, "Worker did not stop within shutdown timeout");
        }
    }
}

/// Sleep that wakes immediately on cancellation.
///
/// Returns `false` when the token fired, `true` after a full sleep.
pub(crate) async fn cancellable_sleep(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellable_sleep_completes_when_uncancelled() {
        let token = CancellationToken::new();
        assert!(cancellable_sleep(&token, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn cancellable_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        let child = token.clone();

        let sleeper = tokio::spawn(async move {
            cancellable_sleep(&child, Duration::from_secs(60)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let completed = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleeper did not wake on cancel")
            .expect("sleeper panicked");
        assert!(!completed);
    }

    #[tokio::test]
    async fn worker_handle_shutdown_joins_task() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            child.cancelled().await;
        });

        let worker = WorkerHandle::new("test", token, handle);
        tokio::time::timeout(Duration::from_secs(1), worker.shutdown())
            .await
            .expect("shutdown did not complete");
    }
}
