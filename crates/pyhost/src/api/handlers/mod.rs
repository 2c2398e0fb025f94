//! API request handlers, organized by domain:
//! - `projects`: project CRUD with reconciled status
//! - `runtime`: start/stop, sync, command execution and packages
//! - `files`: stored tree, folders and ZIP import
//! - `env`: environment variables
//! - `misc`: health check

mod env;
mod files;
mod misc;
mod projects;
mod runtime;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{FileStore, Project};

pub use env::{get_env, set_env};
pub use files::{
    UploadZipRequest, create_file, create_folder, delete_file, list_files, update_file, upload_zip,
};
pub use misc::{HealthResponse, health};
pub use projects::{create_project, delete_project, get_project, list_projects, update_project};
pub use runtime::{
    CommandRequest, PackageRequest, execute_command, install_package, start_project,
    stop_project, sync_files, uninstall_package,
};

/// Fetch a project or fail with 404.
async fn require_project(state: &AppState, project_id: &str) -> ApiResult<Project> {
    state
        .store
        .get_project(project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {}", project_id)))
}
