//! candid-sync - Polis synchronization & scoring microservice
//!
//! Keeps local opinion data synchronized with the external consensus
//! service and periodically retrains ideological coordinates from the
//! vote matrix. Runs three background workers (queue sync, training,
//! conversation scheduling) alongside a small monitoring API.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use candid_sync::config::SyncConfig;
use candid_sync::db::sync_queue::{BackoffPolicy, SyncQueueStore};
use candid_sync::services::polis_client::PolisClient;
use candid_sync::workers::scheduler::ConversationScheduler;
use candid_sync::workers::sync_worker::SyncWorker;
use candid_sync::workers::training_worker::TrainingWorker;
use candid_sync::AppState;

#[derive(Parser, Debug)]
#[command(name = "candid-sync", version, about = "Candid Polis sync service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    info!("Starting candid-sync");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::load(args.config.as_deref())?;

    let db_pool = candid_sync::db::init_database(&config.database_url).await?;
    info!("Database connection established");

    let client = Arc::new(PolisClient::new(
        config.polis.base_url.clone(),
        config.polis.api_key.clone(),
        Duration::from_secs(config.polis.request_timeout_secs),
        config.polis.rate_limit_ms,
        db_pool.clone(),
    )?);

    let policy = BackoffPolicy {
        base: Duration::from_secs(config.worker.base_backoff_secs),
        long_floor: Duration::from_secs(config.worker.long_backoff_floor_secs),
        max_retries: config.worker.max_retries,
    };
    let queue_store = SyncQueueStore::new(db_pool.clone(), policy);

    // Background workers, owned here and torn down on shutdown
    let mut worker_handles = Vec::new();
    if config.polis.enabled {
        worker_handles.push(
            SyncWorker::new(
                db_pool.clone(),
                queue_store.clone(),
                client.clone(),
                config.worker.clone(),
            )
            .start(),
        );
        worker_handles.push(
            TrainingWorker::new(db_pool.clone(), client.clone(), config.training.clone()).start(),
        );
        worker_handles.push(
            ConversationScheduler::new(db_pool.clone(), client.clone(), config.worker.clone())
                .start(),
        );
        info!("Background workers started");
    } else {
        info!("Polis sync disabled, background workers not started");
    }

    let state = AppState::new(db_pool, queue_store);
    let app = candid_sync::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    for handle in worker_handles {
        handle.shutdown().await;
    }
    info!("candid-sync stopped");

    Ok(())
}
