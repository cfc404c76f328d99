//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::DbError;
use crate::ingest::IngestError;
use crate::storage::StorageError;

/// Result type alias for HTTP handlers
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An IO error occurred".to_string())
            },
            AppError::Storage(ref e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A storage error occurred".to_string())
            },
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Unavailable(ref message) => {
                tracing::warn!("Service unavailable: {}", message);
                (StatusCode::SERVICE_UNAVAILABLE, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("file {} not found", key)),
            StorageError::InvalidKey(key) => AppError::BadRequest(format!("invalid file name {}", key)),
            other => AppError::Storage(other),
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => AppError::Database(e),
            DbError::NotFound(msg) => AppError::NotFound(msg),
            DbError::Decode(msg) => AppError::Internal(msg),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Database(e) => AppError::Database(e),
            IngestError::Io(e) => AppError::Io(e),
            IngestError::Storage(e) => e.into(),
            IngestError::NotFound(msg) => AppError::NotFound(msg),
            IngestError::Validation(msg) | IngestError::UnsupportedFormat(msg) => AppError::Validation(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<drp_common::DrpError> for AppError {
    fn from(err: drp_common::DrpError) -> Self {
        use drp_common::DrpError;
        match err {
            DrpError::NotFound(msg) => AppError::NotFound(msg),
            DrpError::Validation(msg) | DrpError::Parse(msg) => AppError::Validation(msg),
            DrpError::Io(e) => AppError::Io(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let (status, body) = body_json(AppError::NotFound("upload 9".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "upload 9");
        assert_eq!(body["error"]["status"], 404);
    }

    #[tokio::test]
    async fn test_database_details_are_hidden() {
        let (status, body) = body_json(AppError::Database(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "A database error occurred");
    }

    #[test]
    fn test_ingest_error_mapping() {
        let err: AppError = IngestError::UnsupportedFormat("pdf".into()).into();
        assert!(matches!(err, AppError::Validation(_)));

        let err: AppError = IngestError::Storage(StorageError::NotFound("uploads/a.csv".into())).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = IngestError::Timeout(std::time::Duration::from_secs(1)).into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_common_error_mapping() {
        let err: AppError = drp_common::DrpError::Validation("unknown data type 'x'".into()).into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
