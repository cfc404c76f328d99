use chrono::Utc;
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::{uploads, DbError, NewUpload};
use crate::features::FeatureState;
use crate::ingest::source::is_supported_file;
use crate::ingest::{DataType, IngestError, IngestJob};
use crate::storage::StorageError;

/// Accept an uploaded file for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDatasetCommand {
    pub data_type: DataType,
    pub original_filename: String,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub remarks: Option<String>,
    pub domain: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDatasetResponse {
    pub upload_record_id: i64,
    pub filename: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadDatasetError {
    #[error("A file is required")]
    FileRequired,
    #[error("Filename is required and cannot be empty")]
    FilenameRequired,
    #[error("Filename must not exceed 200 characters")]
    FilenameLength,
    #[error("Unsupported file type '{0}' (expected csv, txt, tsv, xlsx, xlsm, xls or ods)")]
    UnsupportedFormat(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Failed to enqueue ingestion: {0}")]
    Queue(#[from] IngestError),
}

impl Request<Result<UploadDatasetResponse, UploadDatasetError>> for UploadDatasetCommand {}

impl UploadDatasetCommand {
    pub fn validate(&self) -> Result<(), UploadDatasetError> {
        let name = self.safe_filename();
        if name.is_empty() {
            return Err(UploadDatasetError::FilenameRequired);
        }
        if name.len() > 200 {
            return Err(UploadDatasetError::FilenameLength);
        }
        if !is_supported_file(&name) {
            return Err(UploadDatasetError::UnsupportedFormat(name));
        }
        Ok(())
    }

    /// Final path component of the client's filename, trimmed
    pub fn safe_filename(&self) -> String {
        let name = self.original_filename.trim().replace('\\', "/");
        Path::new(&name)
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim().to_string())
            .unwrap_or_default()
    }

    fn optional(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Store the staged file, create the `pending` upload record and enqueue its ingestion
#[tracing::instrument(skip(state, command, staged), fields(data_type = %command.data_type))]
pub async fn handle(
    state: &FeatureState,
    command: UploadDatasetCommand,
    staged: &Path,
) -> Result<UploadDatasetResponse, UploadDatasetError> {
    command.validate()?;

    let original = command.safe_filename();
    let filename = format!("{}_{}", Utc::now().timestamp(), original);
    let key = format!("{}/{}", command.data_type.upload_dir(), filename);

    state.store.save_upload(&key, staged).await?;

    let upload = uploads::create(
        &state.db,
        command.data_type,
        &NewUpload {
            filename: filename.clone(),
            original_filename: original,
            file_path: Some(key),
            country: UploadDatasetCommand::optional(&command.country),
            industry: UploadDatasetCommand::optional(&command.industry),
            remarks: UploadDatasetCommand::optional(&command.remarks),
            domain: UploadDatasetCommand::optional(&command.domain),
            user_id: command.user_id,
        },
    )
    .await?;

    match &state.scheduler {
        Some(scheduler) => {
            if let Err(e) = scheduler.enqueue(IngestJob::new(upload.id, command.data_type)).await {
                uploads::mark_failed(&state.db, command.data_type, upload.id, &e.to_string()).await?;
                return Err(e.into());
            }
        }
        // Picked up by startup recovery once workers run
        None => tracing::warn!(upload_record_id = upload.id, "Ingestion disabled, upload left pending"),
    }

    tracing::info!(upload_record_id = upload.id, filename = %filename, "Upload accepted");

    Ok(UploadDatasetResponse {
        upload_record_id: upload.id,
        filename,
    })
}
