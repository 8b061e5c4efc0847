//! ledger_worker - task processor for the ledger core
//!
//! Consumes the task queue and runs the registered handlers until Ctrl+C
//! or SIGTERM, then lets in-flight tasks finish.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledger_core::jobs::{PgTaskBroker, SendVerifyEmailHandler, TaskProcessor, TASK_SEND_VERIFY_EMAIL};
use ledger_core::{db, Config, PgLedgerStore, SealedTokenMaker};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "ledger_core=debug,ledger_worker=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.is_production());

    // Fail fast on a bad key rather than on the first request
    SealedTokenMaker::new(&config.token_symmetric_key)?;

    tracing::info!(config = ?config, "Starting ledger worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    let store = Arc::new(PgLedgerStore::new(pool.clone()));
    let broker = Arc::new(PgTaskBroker::new(pool.clone()));

    let mut processor = TaskProcessor::with_config(broker, config.processor_config());
    processor.register_handler(TASK_SEND_VERIFY_EMAIL, Arc::new(SendVerifyEmailHandler::new(store)));

    let handle = processor.start();

    shutdown_signal().await;

    handle.shutdown().await;
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
