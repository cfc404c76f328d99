//! Export routes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::commands::{create, CreateExportCommand, CreateExportError};
use super::queries::{list, ListExportsQuery};
use crate::error::{AppError, AppResult};
use crate::features::FeatureState;

pub fn exports_routes() -> Router<FeatureState> {
    Router::new().route("/", get(list_exports).post(create_export))
}

/// POST /exports
async fn create_export(
    State(state): State<FeatureState>,
    Json(command): Json<CreateExportCommand>,
) -> AppResult<Response> {
    let response = create::handle(&state, command).await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// GET /exports?user_id=7&limit=50
async fn list_exports(
    State(state): State<FeatureState>,
    Query(query): Query<ListExportsQuery>,
) -> AppResult<Response> {
    let response = list::handle(&state.db, query).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

impl From<CreateExportError> for AppError {
    fn from(err: CreateExportError) -> Self {
        match err {
            CreateExportError::InvalidFilters(msg) => AppError::Validation(msg),
            CreateExportError::WorkersDisabled => AppError::Unavailable(err.to_string()),
            CreateExportError::Queue(e) => AppError::Unavailable(e.to_string()),
        }
    }
}
