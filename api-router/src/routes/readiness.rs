use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 if the index answers, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.index.list_documents().await {
        Ok(documents) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "index": "ok" },
                "documents": documents.len()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "index": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
