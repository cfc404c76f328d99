//! Upload routes
//!
//! - `POST /:data_type` multipart upload (`file` plus optional metadata fields)
//! - `GET /:data_type/:id` status and counters
//! - `DELETE /:data_type/:id` remove the batch and its records

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::io::AsyncWriteExt;

use super::commands::{
    create, delete, DeleteUploadCommand, DeleteUploadError, UploadDatasetCommand, UploadDatasetError,
};
use super::queries::{get as get_query, GetUploadError, GetUploadQuery};
use crate::error::{AppError, AppResult};
use crate::features::FeatureState;
use crate::ingest::DataType;

pub fn uploads_routes() -> Router<FeatureState> {
    Router::new()
        .route("/:data_type", post(upload_dataset))
        .route("/:data_type/:id", get(get_upload).delete(delete_upload))
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::BadRequest(format!("Failed to read multipart data: {}", err))
}

fn non_blank(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[tracing::instrument(skip(state, multipart))]
async fn upload_dataset(
    State(state): State<FeatureState>,
    Path(data_type): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let data_type: DataType = data_type.parse()?;
    let mut command = UploadDatasetCommand {
        data_type,
        original_filename: String::new(),
        country: None,
        industry: None,
        remarks: None,
        domain: None,
        user_id: None,
    };
    let mut staged = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                command.original_filename = field.file_name().unwrap_or("").to_string();

                // Streamed to disk chunk by chunk; the body is never held in memory
                let temp = tempfile::NamedTempFile::new()?.into_temp_path();
                let mut file = tokio::fs::File::create(&temp).await?;
                let mut bytes = 0u64;
                while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                    bytes += chunk.len() as u64;
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;

                tracing::debug!(bytes, filename = %command.original_filename, "Upload staged");
                staged = Some(temp);
            }
            "country" => command.country = non_blank(field.text().await.map_err(bad_multipart)?),
            "industry" => command.industry = non_blank(field.text().await.map_err(bad_multipart)?),
            "remarks" => command.remarks = non_blank(field.text().await.map_err(bad_multipart)?),
            "domain" => command.domain = non_blank(field.text().await.map_err(bad_multipart)?),
            "user_id" => {
                command.user_id = non_blank(field.text().await.map_err(bad_multipart)?)
                    .map(|raw| {
                        raw.parse::<i64>()
                            .map_err(|_| AppError::Validation(format!("invalid user_id '{}'", raw)))
                    })
                    .transpose()?;
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let staged = staged.ok_or(UploadDatasetError::FileRequired)?;
    let response = create::handle(&state, command, &staged).await?;

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

async fn get_upload(
    State(state): State<FeatureState>,
    Path((data_type, id)): Path<(String, i64)>,
) -> AppResult<Response> {
    let query = GetUploadQuery {
        data_type: data_type.parse()?,
        id,
    };
    let upload = get_query::handle(&state.db, query).await?;
    Ok((StatusCode::OK, Json(upload)).into_response())
}

async fn delete_upload(
    State(state): State<FeatureState>,
    Path((data_type, id)): Path<(String, i64)>,
) -> AppResult<StatusCode> {
    let command = DeleteUploadCommand {
        data_type: data_type.parse()?,
        id,
    };
    delete::handle(&state, command).await?;
    Ok(StatusCode::NO_CONTENT)
}

impl From<UploadDatasetError> for AppError {
    fn from(err: UploadDatasetError) -> Self {
        match err {
            UploadDatasetError::FileRequired
            | UploadDatasetError::FilenameRequired
            | UploadDatasetError::FilenameLength
            | UploadDatasetError::UnsupportedFormat(_) => AppError::Validation(err.to_string()),
            UploadDatasetError::Storage(e) => e.into(),
            UploadDatasetError::Database(e) => e.into(),
            UploadDatasetError::Queue(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

impl From<GetUploadError> for AppError {
    fn from(err: GetUploadError) -> Self {
        match err {
            GetUploadError::NotFound => AppError::NotFound(err.to_string()),
            GetUploadError::Database(e) => e.into(),
        }
    }
}

impl From<DeleteUploadError> for AppError {
    fn from(err: DeleteUploadError) -> Self {
        match err {
            DeleteUploadError::NotFound => AppError::NotFound(err.to_string()),
            DeleteUploadError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank("  ".into()), None);
        assert_eq!(non_blank(" China ".into()), Some("China".into()));
    }

    #[test]
    fn test_error_mapping() {
        let err: AppError = UploadDatasetError::UnsupportedFormat("a.pdf".into()).into();
        assert!(matches!(err, AppError::Validation(_)));

        let err: AppError = DeleteUploadError::NotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
