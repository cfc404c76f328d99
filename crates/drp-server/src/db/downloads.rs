//! Export run records

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{types::Json, PgPool};

use super::DbResult;
use crate::ingest::{DataType, ExportFilters, ExportFormat, ExportStatus};

/// Default number of download records returned by a listing
pub const DEFAULT_LIST_LIMIT: i64 = 50;

const COLUMNS: &str = "id, filename, file_path, download_url, record_count, format, data_type, \
     upload_record_id, user_id, filters, status, error_message, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DownloadRecord {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub download_url: String,
    pub record_count: i64,
    pub format: String,
    pub data_type: String,
    pub upload_record_id: Option<i64>,
    pub user_id: Option<i64>,
    pub filters: Option<JsonValue>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDownload {
    pub filename: String,
    pub file_path: String,
    pub download_url: String,
    pub record_count: u64,
    pub format: ExportFormat,
    pub data_type: DataType,
    pub filters: ExportFilters,
    pub user_id: Option<i64>,
    pub status: ExportStatus,
    pub error_message: Option<String>,
}

pub async fn insert(pool: &PgPool, download: &NewDownload) -> DbResult<DownloadRecord> {
    let sql = format!(
        "INSERT INTO download_records (filename, file_path, download_url, record_count, format, \
         data_type, upload_record_id, user_id, filters, status, error_message) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {}",
        COLUMNS
    );

    let record = sqlx::query_as::<_, DownloadRecord>(&sql)
        .bind(&download.filename)
        .bind(&download.file_path)
        .bind(&download.download_url)
        .bind(download.record_count as i64)
        .bind(download.format.extension())
        .bind(download.data_type.as_str())
        .bind(download.filters.upload_record_id)
        .bind(download.user_id)
        .bind(Json(&download.filters))
        .bind(download.status.as_str())
        .bind(&download.error_message)
        .fetch_one(pool)
        .await?;

    tracing::debug!(download_id = record.id, status = %record.status, "Recorded export");
    Ok(record)
}

/// Newest first; every user's exports when `user_id` is `None`
pub async fn list_for_user(pool: &PgPool, user_id: Option<i64>, limit: i64) -> DbResult<Vec<DownloadRecord>> {
    let sql = format!(
        "SELECT {} FROM download_records WHERE ($1::bigint IS NULL OR user_id = $1) \
         ORDER BY created_at DESC, id DESC LIMIT $2",
        COLUMNS
    );
    Ok(sqlx::query_as::<_, DownloadRecord>(&sql)
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await?)
}
