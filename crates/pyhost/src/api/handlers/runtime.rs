//! Process control, workspace sync, command execution and packages.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::watcher::RescanReport;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub message: String,
    pub pid: u32,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl SyncResponse {
    fn from_report(message: impl Into<String>, report: &RescanReport) -> Self {
        Self {
            message: message.into(),
            created: report.created,
            updated: report.updated,
            failed: report.failed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRequest {
    pub package_name: String,
}

#[derive(Debug, Serialize)]
pub struct OutputResponse {
    pub output: String,
}

/// POST /api/projects/{id}/start
#[instrument(skip(state))]
pub async fn start_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<StartResponse>> {
    let pid = state.supervisor.start(&project_id).await?;
    Ok(Json(StartResponse {
        message: "Project started".to_string(),
        pid,
    }))
}

/// POST /api/projects/{id}/stop
///
/// Stops the process, then pulls whatever it wrote into the store.
#[instrument(skip(state))]
pub async fn stop_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SyncResponse>> {
    super::require_project(&state, &project_id).await?;
    state.supervisor.stop(&project_id).await?;

    let report = match state.supervisor.rescan_workspace(&project_id).await {
        Ok(report) => report,
        Err(e) => {
            warn!(project_id, "sync after stop failed: {}", e);
            RescanReport::default()
        }
    };
    Ok(Json(SyncResponse::from_report("Project stopped", &report)))
}

/// POST /api/projects/{id}/sync-files
#[instrument(skip(state))]
pub async fn sync_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SyncResponse>> {
    super::require_project(&state, &project_id).await?;
    let report = state.supervisor.rescan_workspace(&project_id).await?;
    Ok(Json(SyncResponse::from_report("Files synced", &report)))
}

/// POST /api/projects/{id}/execute-command
#[instrument(skip(state, request))]
pub async fn execute_command(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<OutputResponse>> {
    super::require_project(&state, &project_id).await?;
    if request.command.trim().is_empty() {
        return Err(ApiError::bad_request("command is required"));
    }
    let output = state
        .supervisor
        .execute_command(&project_id, &request.command)
        .await?;
    Ok(Json(OutputResponse { output }))
}

/// POST /api/projects/{id}/install-package
#[instrument(skip(state))]
pub async fn install_package(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<PackageRequest>,
) -> ApiResult<Json<OutputResponse>> {
    super::require_project(&state, &project_id).await?;
    let output = state
        .supervisor
        .install_package(&project_id, request.package_name.trim())
        .await?;
    Ok(Json(OutputResponse { output }))
}

/// POST /api/projects/{id}/uninstall-package
#[instrument(skip(state))]
pub async fn uninstall_package(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<PackageRequest>,
) -> ApiResult<Json<OutputResponse>> {
    super::require_project(&state, &project_id).await?;
    let output = state
        .supervisor
        .uninstall_package(&project_id, request.package_name.trim())
        .await?;
    Ok(Json(OutputResponse { output }))
}
