//! Upload status records, one table per dataset type.
//!
//! An upload record is the durable state of an ingestion job: it is created
//! `pending` when the file is stored, moves to `processing` at the start of
//! every attempt and ends `completed` (with final counters) or `failed` (with
//! the last error message).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{DbError, DbResult};
use crate::ingest::{DataType, IngestStats, UploadStatus};

const COLUMNS: &str = "id, filename, original_filename, file_path, country, industry, remarks, domain, \
     total_count, processed_count, success_count, duplicate_count, status, error_message, user_id, \
     attempts, started_at, completed_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub remarks: Option<String>,
    pub domain: Option<String>,
    pub total_count: i64,
    pub processed_count: i64,
    pub success_count: i64,
    pub duplicate_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub user_id: Option<i64>,
    pub attempts: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn status(&self) -> DbResult<UploadStatus> {
        self.status
            .parse()
            .map_err(|e: drp_common::DrpError| DbError::Decode(e.to_string()))
    }
}

/// Fields supplied when an upload is accepted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUpload {
    pub filename: String,
    pub original_filename: String,
    pub file_path: Option<String>,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub remarks: Option<String>,
    pub domain: Option<String>,
    pub user_id: Option<i64>,
}

pub async fn create(pool: &PgPool, data_type: DataType, upload: &NewUpload) -> DbResult<UploadRecord> {
    let sql = format!(
        "INSERT INTO {} (filename, original_filename, file_path, country, industry, remarks, domain, user_id, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending') RETURNING {}",
        data_type.upload_table(),
        COLUMNS
    );

    let record = sqlx::query_as::<_, UploadRecord>(&sql)
        .bind(&upload.filename)
        .bind(&upload.original_filename)
        .bind(&upload.file_path)
        .bind(&upload.country)
        .bind(&upload.industry)
        .bind(&upload.remarks)
        .bind(&upload.domain)
        .bind(upload.user_id)
        .fetch_one(pool)
        .await?;

    tracing::debug!(data_type = %data_type, upload_record_id = record.id, "Created upload record");
    Ok(record)
}

pub async fn get(pool: &PgPool, data_type: DataType, id: i64) -> DbResult<Option<UploadRecord>> {
    let sql = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, data_type.upload_table());
    Ok(sqlx::query_as::<_, UploadRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Start an attempt: `processing`, one more attempt, fresh start time
pub async fn mark_processing(pool: &PgPool, data_type: DataType, id: i64) -> DbResult<()> {
    let sql = format!(
        "UPDATE {} SET status = 'processing', attempts = attempts + 1, started_at = NOW(), \
         completed_at = NULL, error_message = NULL, updated_at = NOW() WHERE id = $1",
        data_type.upload_table()
    );
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(DbError::not_found(&format!("{} upload", data_type), id));
    }
    Ok(())
}

/// Persist a mid-run snapshot of the counters
pub async fn update_progress(pool: &PgPool, data_type: DataType, id: i64, stats: &IngestStats) -> DbResult<()> {
    let sql = format!(
        "UPDATE {} SET total_count = $2, processed_count = $3, success_count = $4, \
         duplicate_count = $5, updated_at = NOW() WHERE id = $1",
        data_type.upload_table()
    );
    bind_counters(sqlx::query(&sql).bind(id), stats).execute(pool).await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, data_type: DataType, id: i64, stats: &IngestStats) -> DbResult<()> {
    let sql = format!(
        "UPDATE {} SET total_count = $2, processed_count = $3, success_count = $4, \
         duplicate_count = $5, status = 'completed', error_message = NULL, \
         completed_at = NOW(), updated_at = NOW() WHERE id = $1",
        data_type.upload_table()
    );
    bind_counters(sqlx::query(&sql).bind(id), stats).execute(pool).await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, data_type: DataType, id: i64, message: &str) -> DbResult<()> {
    let sql = format!(
        "UPDATE {} SET status = 'failed', error_message = $2, completed_at = NOW(), \
         updated_at = NOW() WHERE id = $1",
        data_type.upload_table()
    );
    sqlx::query(&sql).bind(id).bind(message).execute(pool).await?;
    Ok(())
}

/// Delete an upload; its stored rows go with it (`ON DELETE CASCADE`)
pub async fn delete(pool: &PgPool, data_type: DataType, id: i64) -> DbResult<bool> {
    let sql = format!("DELETE FROM {} WHERE id = $1", data_type.upload_table());
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Uploads left `pending` or `processing`, oldest first
pub async fn list_unfinished(pool: &PgPool, data_type: DataType) -> DbResult<Vec<UploadRecord>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE status IN ('pending', 'processing') ORDER BY id",
        COLUMNS,
        data_type.upload_table()
    );
    Ok(sqlx::query_as::<_, UploadRecord>(&sql).fetch_all(pool).await?)
}

fn bind_counters<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    stats: &IngestStats,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(stats.total_rows as i64)
        .bind(stats.processed_rows as i64)
        .bind(stats.success_count as i64)
        .bind(stats.duplicate_count as i64)
}
