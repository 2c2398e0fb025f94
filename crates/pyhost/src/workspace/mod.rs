//! On-disk project workspaces and materialization of the stored tree.

mod paths;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::hub::LogHub;
use crate::store::{FileStore, StoreError};

pub use paths::{has_parent_segment, is_hidden, relative_path, resolve_path, verify_within_root};

/// Errors raised while preparing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A stored path tried to leave the workspace root.
    #[error("invalid file path: {0}")]
    PathTraversal(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Layout of project workspaces under a common root.
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
}

impl Workspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace directory of a project (not created).
    pub fn dir(&self, project_id: &str) -> Result<PathBuf, WorkspaceError> {
        let valid = !project_id.is_empty()
            && project_id != "."
            && project_id != ".."
            && !project_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(WorkspaceError::InvalidProjectId(project_id.to_string()));
        }
        Ok(self.root.join(project_id))
    }

    /// Create the workspace directory if missing and return it.
    pub async fn ensure(&self, project_id: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.dir(project_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))?;
        Ok(dir)
    }

    /// Delete a project's workspace directory and everything in it.
    pub async fn remove(&self, project_id: &str) -> Result<(), WorkspaceError> {
        let dir = self.dir(project_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(&dir, e)),
        }
    }
}

/// Summary of one materialization pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub files_written: usize,
    pub directories_created: usize,
}

/// Write a project's stored tree into `workspace_dir`.
///
/// Every stored path is validated before anything is written, including
/// against symlinks already in the workspace, so a single traversal attempt
/// aborts the whole pass without touching the disk. Files
/// already on disk are overwritten; files absent from the store are left alone.
pub async fn materialize(
    store: &dyn FileStore,
    hub: &LogHub,
    project_id: &str,
    workspace_dir: &Path,
) -> Result<MaterializeReport, WorkspaceError> {
    fs::create_dir_all(workspace_dir)
        .await
        .map_err(|e| WorkspaceError::io(workspace_dir, e))?;

    hub.log(
        project_id,
        format!("📁 Preparing files in: {}\n", workspace_dir.display()),
    );

    let files = store.list_files(project_id).await?;

    let mut planned = Vec::with_capacity(files.len());
    for file in &files {
        let relative = file.relative_path();
        if has_parent_segment(&relative) {
            return Err(WorkspaceError::PathTraversal(relative));
        }
        let target = resolve_path(workspace_dir, &relative)?;
        verify_within_root(workspace_dir, &target, &relative)?;
        planned.push((file, relative, target));
    }

    let mut report = MaterializeReport::default();
    for (file, relative, target) in planned {
        if file.is_directory {
            fs::create_dir_all(&target)
                .await
                .map_err(|e| WorkspaceError::io(&target, e))?;
            report.directories_created += 1;
            debug!(project_id, path = %relative, "created directory");
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(parent, e))?;
        }
        fs::write(&target, file.content.as_bytes())
            .await
            .map_err(|e| WorkspaceError::io(&target, e))?;
        report.files_written += 1;
        hub.log(project_id, format!("  ✓ Written: {}\n", relative));
    }

    info!(
        project_id,
        files = report.files_written,
        directories = report.directories_created,
        "workspace materialized"
    );
    Ok(report)
}
