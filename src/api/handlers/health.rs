//! Health check and catch-all endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

pub const API_DOC_HINT: &str = "Please refer to the API doc.";

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proxypool",
            "store": state.backend,
            "targets": state.query.targets().len(),
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}

/// Any unknown path
pub async fn api_doc() -> impl IntoResponse {
    (StatusCode::OK, API_DOC_HINT)
}
