//! Health check

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::db;
use crate::features::FeatureState;

pub fn health_routes() -> Router<FeatureState> {
    Router::new().route("/", get(health_check))
}

/// GET /health
async fn health_check(State(state): State<FeatureState>) -> (StatusCode, Json<Value>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "storage": state.store.backend(),
                "workers": state.scheduler.is_some(),
            })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                })),
            )
        }
    }
}
