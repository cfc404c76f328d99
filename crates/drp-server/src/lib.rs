//! DRP Server Library
//!
//! Tabular data ingestion service: CSV and spreadsheet uploads are streamed
//! into per-type record tables keyed by phone number, and the stored records
//! can be exported back to CSV or XLSX.
//!
//! # Overview
//!
//! - **Ingestion**: header detection, normalization, in-batch dedup and
//!   insert-or-skip batch writes ([`ingest`])
//! - **Jobs**: a bounded worker pool with retries and per-attempt timeouts
//!   ([`ingest::JobScheduler`])
//! - **Persistence**: upload, record and download tables in PostgreSQL ([`db`])
//! - **Storage**: local directory or S3-compatible bucket ([`storage`])
//! - **HTTP**: thin axum surface under `/api/v1` ([`features`])
//!
//! # Example
//!
//! ```no_run
//! use drp_server::{config::Config, db, ingest::LogNotifier, storage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = storage::build_store(&config.storage);
//!     let (scheduler, workers) =
//!         drp_server::start_workers(pool.clone(), store, &config.ingest, Arc::new(LogNotifier));
//!     drop(scheduler);
//!     workers.await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

pub use error::{AppError, AppResult};

use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::FeatureState;
use crate::ingest::{ExportPipeline, IngestConfig, IngestPipeline, JobScheduler, Notifier, PipelineRunner};
use crate::storage::FileStore;

/// Feature routes under `/api/v1` with the middleware stack applied
pub fn app(state: FeatureState, config: &Config) -> Router {
    Router::new()
        .nest("/api/v1", features::router(state))
        .layer(middleware::upload_limit(config.server.max_upload_bytes))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Start the job workers over the ingestion and export pipelines.
///
/// The handle resolves after every scheduler clone is dropped and queued jobs finish.
pub fn start_workers(
    pool: PgPool,
    store: Arc<dyn FileStore>,
    config: &IngestConfig,
    notifier: Arc<dyn Notifier>,
) -> (JobScheduler, JoinHandle<()>) {
    let ingest = IngestPipeline::new(pool.clone(), store.clone(), config.clone());
    let export = ExportPipeline::new(pool, store, notifier, config.export_page_size);
    JobScheduler::start(Arc::new(PipelineRunner::new(ingest, export)), config)
}
