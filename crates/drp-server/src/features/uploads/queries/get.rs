//! Upload status query

use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db::{uploads, DbError, UploadRecord};
use crate::ingest::DataType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUploadQuery {
    pub data_type: DataType,
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GetUploadError {
    #[error("Upload not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl Request<Result<UploadRecord, GetUploadError>> for GetUploadQuery {}

pub async fn handle(pool: &PgPool, query: GetUploadQuery) -> Result<UploadRecord, GetUploadError> {
    uploads::get(pool, query.data_type, query.id)
        .await?
        .ok_or(GetUploadError::NotFound)
}
