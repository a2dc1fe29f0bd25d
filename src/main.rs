//! Hookwire webhook delivery service.
//!
//! Main entry point. Loads configuration, prepares the database schema,
//! and runs the dispatch scheduler until a shutdown signal arrives.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use config::Config;
use hookwire_core::{
    storage::Storage,
    time::{Clock, RealClock},
};
use hookwire_delivery::{Dispatcher, PostgresDeliveryStorage, Scheduler};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    info!("starting hookwire webhook delivery service");
    info!(
        database_url = %config.database_url_masked(),
        batch_size = config.dispatch_batch_size,
        tick_interval_secs = config.dispatch_interval_seconds,
        max_attempts = config.max_retry_attempts,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    ensure_schema(&db_pool).await?;
    info!("database schema ready");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    let delivery_storage = Arc::new(PostgresDeliveryStorage::new(storage));

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let dispatcher = Arc::new(
        Dispatcher::new(delivery_storage, config.to_dispatcher_config(), clock.clone())
            .context("failed to build delivery dispatcher")?,
    );

    let scheduler = Scheduler::new(dispatcher, config.to_scheduler_config(), clock);
    let handle = scheduler.spawn();
    info!("dispatch scheduler running");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    if let Err(e) = handle.shutdown_graceful().await {
        error!(error = %e, "scheduler did not stop cleanly");
    }

    db_pool.close().await;
    info!("database connections closed");

    info!("hookwire shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(&config.rust_log).expect("invalid log filter configuration");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the queue tables and indexes exist.
async fn ensure_schema(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_registrations (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            target_url TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE(user_id, event_type)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhook_registrations table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_jobs (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            registration_id UUID NOT NULL REFERENCES webhook_registrations(id),
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TIMESTAMPTZ,
            next_attempt_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create delivery_jobs table")?;

    // Partial index backing the due-job claim query.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_jobs_due
        ON delivery_jobs(status, next_attempt_at)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create delivery_jobs due index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
