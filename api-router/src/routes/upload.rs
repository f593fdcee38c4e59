use std::path::Path;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use common::error::AppError;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub doc_id: Option<String>,
}

pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input.file.metadata.file_name.clone().unwrap_or_default();
    let doc_id = input.doc_id.filter(|id| !id.trim().is_empty());

    info!(
        file_name = %file_name,
        requested_doc_id = doc_id.as_deref().unwrap_or("<generated>"),
        "Received upload"
    );

    // The index detects the document type from the extension, so the staged
    // copy keeps it. It is removed when `staged` is dropped.
    let staged = stage_upload(&state.config.upload_dir, &file_name, &input.file.contents).await?;

    let doc_id = state.index.insert(staged.path(), doc_id).await?;

    Ok((StatusCode::OK, Json(json!({ "uuid": doc_id }))))
}

async fn stage_upload(
    upload_dir: &str,
    file_name: &str,
    contents: &NamedTempFile,
) -> Result<NamedTempFile, ApiError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(AppError::Io)?;

    let suffix = safe_extension(file_name)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(upload_dir)
        .map_err(AppError::Io)?;

    tokio::fs::copy(contents.path(), staged.path())
        .await
        .map_err(AppError::Io)?;

    Ok(staged)
}

/// Lowercased extension of a client-supplied file name, if it is plain ASCII
/// alphanumerics. Everything else about the name is ignored.
fn safe_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
