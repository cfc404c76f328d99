//! Postgres persistence for upload batches, stored records and exports
//!
//! - [`uploads`]: per-type upload status records (ingestion job state)
//! - [`records`]: paged reads of stored rows for exports
//! - [`downloads`]: export run records
//!
//! Table names come from [`DataType`](crate::ingest::DataType) constants and
//! are interpolated into SQL; every value is bound.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;

pub mod downloads;
pub mod records;
pub mod uploads;

pub use downloads::{DownloadRecord, NewDownload};
pub use records::PgRecordPages;
pub use uploads::{NewUpload, UploadRecord};

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Requested record does not exist
    #[error("{0}")]
    NotFound(String),

    /// A stored value could not be interpreted
    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl DbError {
    /// Create a not found error with resource context
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found in database", resource_type, identifier))
    }
}

pub type DbResult<T> = Result<T, DbError>;

pub async fn create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}
