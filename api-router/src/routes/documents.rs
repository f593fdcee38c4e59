use axum::{extract::State, response::IntoResponse, Json};

use crate::{api_state::ApiState, error::ApiError};

pub async fn list_documents(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let documents = state.index.list_documents().await?;

    Ok(Json(documents))
}
