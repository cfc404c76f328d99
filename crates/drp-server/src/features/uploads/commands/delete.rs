use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::db::{uploads, DbError};
use crate::features::FeatureState;
use crate::ingest::DataType;

/// Delete an upload batch and, by cascade, every record it inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadCommand {
    pub data_type: DataType,
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteUploadError {
    #[error("Upload not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl Request<Result<(), DeleteUploadError>> for DeleteUploadCommand {}

#[tracing::instrument(skip(state), fields(data_type = %command.data_type, upload_record_id = command.id))]
pub async fn handle(state: &FeatureState, command: DeleteUploadCommand) -> Result<(), DeleteUploadError> {
    let upload = uploads::get(&state.db, command.data_type, command.id)
        .await?
        .ok_or(DeleteUploadError::NotFound)?;

    if !uploads::delete(&state.db, command.data_type, command.id).await? {
        return Err(DeleteUploadError::NotFound);
    }

    // The source file is normally gone once ingestion completes
    if let Some(key) = upload.file_path.as_deref() {
        if let Err(e) = state.store.delete(key).await {
            tracing::warn!(key, error = %e, "Failed to delete source file of removed upload");
        }
    }

    tracing::info!("Upload deleted");
    Ok(())
}
