//! DRP Server - Main entry point

use anyhow::{Context, Result};
use drp_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use drp_server::{
    config::Config,
    db,
    features::FeatureState,
    ingest::{pipeline::requeue_unfinished, LogNotifier},
    storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("drp-server")
        .filter_directives("drp_server=debug,tower_http=debug,sqlx=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting DRP Server");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    let store = storage::build_store(&config.storage);

    let workers = if config.ingest.enabled {
        let (scheduler, handle) = drp_server::start_workers(
            db_pool.clone(),
            store.clone(),
            &config.ingest,
            Arc::new(LogNotifier),
        );
        requeue_unfinished(&db_pool, &scheduler)
            .await
            .context("Failed to re-enqueue unfinished uploads")?;
        Some((scheduler, handle))
    } else {
        info!("Ingestion is disabled (INGEST_ENABLED=false)");
        None
    };

    let state = FeatureState {
        db: db_pool,
        store,
        scheduler: workers.as_ref().map(|(scheduler, _)| scheduler.clone()),
    };
    let app = drp_server::app(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and its scheduler clone) is gone; closing ours lets the queue drain
    if let Some((scheduler, handle)) = workers {
        drop(scheduler);
        let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
        info!(timeout_secs = timeout.as_secs(), "Waiting for running jobs");
        if tokio::time::timeout(timeout, handle).await.is_err() {
            warn!("Jobs still running at shutdown; unfinished uploads are re-enqueued on next start");
        }
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
