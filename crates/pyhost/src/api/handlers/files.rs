//! Stored tree handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::archive;
use crate::store::{FileStore, NewFile, StoredFile};
use crate::workspace::has_parent_segment;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadZipRequest {
    pub zip_content: String,
    #[serde(default)]
    pub target_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadZipResponse {
    pub message: String,
    pub files: Vec<StoredFile>,
    pub updated: usize,
}

/// Entry names are single components; parent paths are `/`-joined and stay
/// inside the project.
fn validate_entry(path: &str, name: &str) -> ApiResult<()> {
    let name = name.trim();
    if name.is_empty() || name == "." || name.contains(['/', '\\', '\0']) {
        return Err(ApiError::bad_request(format!("invalid name: {:?}", name)));
    }
    if has_parent_segment(path) || has_parent_segment(name) || path.contains('\0') {
        return Err(ApiError::Forbidden(format!("invalid path: {}/{}", path, name)));
    }
    Ok(())
}

/// Ensure the workspace exists and is watched; failures only degrade syncing.
async fn touch_workspace(state: &AppState, project_id: &str) {
    if let Err(e) = state.supervisor.prepare_workspace(project_id).await {
        warn!(project_id, "failed to prepare workspace: {}", e);
    }
}

/// GET /api/projects/{id}/files
#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<StoredFile>>> {
    super::require_project(&state, &project_id).await?;
    Ok(Json(state.store.list_files(&project_id).await?))
}

/// POST /api/projects/{id}/files
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(mut request): Json<NewFile>,
) -> ApiResult<(StatusCode, Json<StoredFile>)> {
    super::require_project(&state, &project_id).await?;
    request.path = request.path.trim_matches('/').to_string();
    validate_entry(&request.path, &request.name)?;

    let file = state.store.create_file(&project_id, request).await?;
    touch_workspace(&state, &project_id).await;
    Ok((StatusCode::CREATED, Json(file)))
}

/// POST /api/projects/{id}/folders
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_folder(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateFolderRequest>,
) -> ApiResult<(StatusCode, Json<StoredFile>)> {
    super::require_project(&state, &project_id).await?;
    let path = request.path.trim_matches('/').to_string();
    validate_entry(&path, &request.name)?;

    let folder = state
        .store
        .create_file(&project_id, NewFile::directory(path, request.name.trim()))
        .await?;
    touch_workspace(&state, &project_id).await;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// PATCH /api/projects/{id}/files/{file_id}
#[instrument(skip(state, request))]
pub async fn update_file(
    State(state): State<AppState>,
    Path((project_id, file_id)): Path<(String, String)>,
    Json(request): Json<UpdateFileRequest>,
) -> ApiResult<Json<StoredFile>> {
    state
        .store
        .update_file(&file_id, &project_id, &request.content)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("file {}", file_id)))
}

/// DELETE /api/projects/{id}/files/{file_id}
///
/// Deleting a folder removes everything stored below it.
#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path((project_id, file_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let file = state
        .store
        .get_file(&file_id, &project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("file {}", file_id)))?;

    if file.is_directory {
        let prefix = format!("{}/", file.relative_path());
        for child in state.store.list_files(&project_id).await? {
            if child.relative_path().starts_with(&prefix) {
                state.store.delete_file(&child.id, &project_id).await?;
            }
        }
    }
    state.store.delete_file(&file.id, &project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/projects/{id}/upload-zip
#[instrument(skip(state, request))]
pub async fn upload_zip(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<UploadZipRequest>,
) -> ApiResult<Json<UploadZipResponse>> {
    super::require_project(&state, &project_id).await?;
    let report = archive::import_zip(
        &state.store,
        &project_id,
        &request.zip_content,
        request.target_path.as_deref(),
    )
    .await?;
    touch_workspace(&state, &project_id).await;

    Ok(Json(UploadZipResponse {
        message: "ZIP file extracted successfully".to_string(),
        files: report.created,
        updated: report.updated,
    }))
}
