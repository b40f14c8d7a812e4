//! Expiry sweeper daemon.
//!
//! Reclaims inventory from abandoned checkouts: pending orders older than the
//! reservation TTL are cancelled and expired holds that never became orders
//! are released. Runs until Ctrl+C or SIGTERM.

use boxoffice_core::ExpirySweeper;
use boxoffice_core::environment::SystemClock;
use boxoffice_postgres::PostgresInventoryStore;
use boxoffice_runtime::{MetricsServer, SweeperWorker};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use ticketing::Config;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        interval_secs = config.sweeper.interval_secs,
        batch_size = config.sweeper.batch_size,
        reservation_ttl_secs = config.inventory.reservation_ttl_secs,
        "Starting Box Office expiry sweeper"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start()?;

    info!("Connecting to inventory database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await?;
    let store = PostgresInventoryStore::from_pool(pool).with_lock_timeout(config.postgres.lock_timeout_ms);
    store.migrate().await?;
    info!("Inventory database ready");

    let sweeper = ExpirySweeper::new(Arc::new(store), Arc::new(SystemClock))
        .with_ttl(config.reservation_ttl())
        .with_batch_size(config.sweeper.batch_size);
    let (worker, shutdown_tx) = SweeperWorker::new(sweeper, config.sweeper_interval());
    let handle = worker.spawn();

    shutdown_signal().await;
    info!("Shutdown signal received, stopping sweeper...");
    if shutdown_tx.send(true).is_err() {
        warn!("Sweeper worker already stopped");
    }

    match tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), handle).await {
        Ok(Ok(summary)) => info!(
            passes = summary.passes,
            failed_passes = summary.failed_passes,
            cancelled = summary.totals.cancelled,
            orphans_released = summary.totals.orphans_released,
            "Sweeper stopped gracefully"
        ),
        Ok(Err(e)) => warn!(error = %e, "Sweeper task failed"),
        Err(_) => warn!("Sweeper shutdown timed out"),
    }

    Ok(())
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
