//! Tabular ingestion and export
//!
//! Uploaded spreadsheets and delimited files are streamed row by row,
//! deduplicated on their phone column and written in batches with
//! insert-or-skip semantics. The same records can later be exported back
//! to CSV or XLSX.
//!
//! # Architecture
//!
//! - **source**: [`RowSource`] adapters over CSV and workbook files
//! - **header**: first-row header detection
//! - **normalizer**: raw row → (identifier, attributes)
//! - **ingestor**: [`BatchIngestor`], the dedup + buffering state machine
//! - **writer**: [`BulkWriter`] and its Postgres implementation
//! - **exporter**: column-union export to CSV / XLSX
//! - **pipeline**: ingestion and export runs bound to the status tables
//! - **scheduler**: worker pool with retry and timeout policy
//! - **notify**: export completion notifications
//! - **config**: `INGEST_*` / `EXPORT_*` environment configuration

pub mod config;
pub mod exporter;
pub mod header;
pub mod ingestor;
pub mod jobs;
pub mod models;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod writer;

pub use config::IngestConfig;
pub use exporter::{ExportFilters, ExportSummary, Exporter, RecordPages};
pub use header::{detect_header, HeaderDecision};
pub use ingestor::{BatchIngestor, IngestState, ProgressSink};
pub use jobs::{ExportJob, IngestJob, Job};
pub use models::{
    AttributeSet, DataType, ExportFormat, ExportStatus, IngestStats, PendingRow, StoredRecord, UploadStatus,
};
pub use normalizer::{NormalizedRow, RowNormalizer};
pub use notify::{BroadcastNotifier, ExportCompleted, LogNotifier, Notifier};
pub use pipeline::{ExportPipeline, IngestPipeline, PipelineRunner};
pub use scheduler::{JobRunner, JobScheduler, RetryPolicy};
pub use source::{open_row_source, CellValue, CsvRowSource, RawRow, RowSource, WorkbookRowSource, XlsxRowSource};
pub use writer::{BulkWriter, PgBulkWriter};

use std::time::Duration;
use thiserror::Error;

use crate::storage::StorageError;

/// Result alias for the ingestion pipeline
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while ingesting or exporting tabular data
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet read error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Spreadsheet write error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Whether another attempt of the same job could succeed.
    ///
    /// Missing inputs and malformed requests fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UnsupportedFormat(_) | Self::Validation(_) | Self::NotFound(_) => false,
            Self::Storage(e) => e.is_retryable(),
            _ => true,
        }
    }
}

impl From<drp_common::DrpError> for IngestError {
    fn from(err: drp_common::DrpError) -> Self {
        use drp_common::DrpError;
        match err {
            DrpError::Io(e) => Self::Io(e),
            DrpError::Serialization(e) => Self::Json(e),
            DrpError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<crate::db::DbError> for IngestError {
    fn from(err: crate::db::DbError) -> Self {
        use crate::db::DbError;
        match err {
            DbError::Sqlx(e) => Self::Database(e),
            DbError::NotFound(msg) => Self::NotFound(msg),
            DbError::Decode(msg) => Self::Validation(msg),
        }
    }
}
