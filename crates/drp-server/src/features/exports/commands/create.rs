use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::features::FeatureState;
use crate::ingest::{DataType, ExportFilters, ExportFormat, ExportJob, IngestError};

/// Queue an export of one dataset type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExportCommand {
    pub data_type: DataType,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: ExportFilters,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExportResponse {
    pub status: String,
    pub data_type: DataType,
    pub format: ExportFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateExportError {
    #[error("{0}")]
    InvalidFilters(String),
    #[error("Export workers are not running")]
    WorkersDisabled,
    #[error("Failed to enqueue export: {0}")]
    Queue(#[from] IngestError),
}

impl Request<Result<CreateExportResponse, CreateExportError>> for CreateExportCommand {}

impl CreateExportCommand {
    pub fn validate(&self) -> Result<(), CreateExportError> {
        self.filters
            .validate()
            .map_err(|e| CreateExportError::InvalidFilters(e.to_string()))
    }
}

#[tracing::instrument(skip(state, command), fields(data_type = %command.data_type, format = %command.format))]
pub async fn handle(
    state: &FeatureState,
    command: CreateExportCommand,
) -> Result<CreateExportResponse, CreateExportError> {
    command.validate()?;
    let scheduler = state.scheduler.as_ref().ok_or(CreateExportError::WorkersDisabled)?;

    let mut job = ExportJob::new(command.data_type, command.filters, command.format);
    if let Some(user_id) = command.user_id {
        job = job.with_user(user_id);
    }
    scheduler.enqueue(job).await?;

    Ok(CreateExportResponse {
        status: "queued".to_string(),
        data_type: command.data_type,
        format: command.format,
    })
}
