//! Environment variable handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{EnvVar, EnvironmentVariable, FileStore};

/// GET /api/projects/{id}/env
#[instrument(skip(state))]
pub async fn get_env(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<EnvironmentVariable>>> {
    super::require_project(&state, &project_id).await?;
    Ok(Json(state.store.get_environment_variables(&project_id).await?))
}

/// POST /api/projects/{id}/env
///
/// Replaces the whole set.
#[instrument(skip(state, vars), fields(count = vars.len()))]
pub async fn set_env(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(vars): Json<Vec<EnvVar>>,
) -> ApiResult<Json<Vec<EnvironmentVariable>>> {
    super::require_project(&state, &project_id).await?;
    if let Some(bad) = vars
        .iter()
        .find(|v| v.key.is_empty() || v.key.contains(['=', '\0']))
    {
        return Err(ApiError::bad_request(format!(
            "invalid variable name: {:?}",
            bad.key
        )));
    }
    state
        .store
        .set_environment_variables(&project_id, &vars)
        .await?;
    Ok(Json(state.store.get_environment_variables(&project_id).await?))
}
