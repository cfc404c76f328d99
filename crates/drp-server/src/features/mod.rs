//! HTTP features
//!
//! Each feature is a vertical slice with its own `commands/`, `queries/` and
//! `routes.rs`:
//!
//! - **uploads**: accept files for ingestion, report status, delete batches
//! - **exports**: queue exports, list downloads
//! - **health**: database ping

pub mod exports;
pub mod health;
pub mod uploads;

use axum::Router;
use std::sync::Arc;

use crate::ingest::JobScheduler;
use crate::storage::FileStore;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// PostgreSQL connection pool
    pub db: sqlx::PgPool,
    /// Where uploads are stored until ingested
    pub store: Arc<dyn FileStore>,
    /// Job queue; `None` when `INGEST_ENABLED=false`
    pub scheduler: Option<JobScheduler>,
}

/// Creates the API router with all feature routes mounted
///
/// - `/uploads` - Upload and ingestion status
/// - `/exports` - Export requests and downloads
/// - `/health` - Health check
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest("/uploads", uploads::uploads_routes())
        .nest("/exports", exports::exports_routes())
        .nest("/health", health::health_routes())
        .with_state(state)
}
