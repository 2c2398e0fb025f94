//! Project handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, instrument, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{NewProject, Project, ProjectUpdate};

/// GET /api/projects
#[instrument(skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    let mut projects = Vec::new();
    for project in state.store.list_projects().await? {
        if let Some(project) = state.supervisor.project(&project.id).await? {
            projects.push(project);
        }
    }
    Ok(Json(projects))
}

/// POST /api/projects
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("project name is required"));
    }
    let project = state.store.create_project(request).await?;
    info!(project_id = %project.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects/{id}
#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    state
        .supervisor
        .project(&project_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("project {}", project_id)))
}

/// PATCH /api/projects/{id}
#[instrument(skip(state, update))]
pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(update): Json<ProjectUpdate>,
) -> ApiResult<Json<Project>> {
    state
        .store
        .update_project(&project_id, update)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("project {}", project_id)))
}

/// DELETE /api/projects/{id}
#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    super::require_project(&state, &project_id).await?;

    if let Err(e) = state.supervisor.retire(&project_id).await {
        warn!(project_id, "failed to clean up project runtime: {}", e);
    }
    if !state.store.delete_project(&project_id).await? {
        return Err(ApiError::not_found(format!("project {}", project_id)));
    }
    info!(project_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}
