//! Durable store of projects, their file trees and environment variables.
//!
//! The supervisor, materializer and watcher only see the [`FileStore`] trait;
//! [`SqliteStore`] is the production implementation and also carries the
//! plain CRUD the HTTP layer needs.

mod error;
mod models;
mod repository;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use models::{
    EnvVar, EnvironmentVariable, NewFile, NewProject, Project, ProjectStatus, ProjectUpdate,
    StoredFile, join_relative, split_relative,
};
pub use repository::SqliteStore;

/// Store operations consumed by the synchronization engine.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch a project.
    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>>;

    /// Persist a project's run status.
    async fn set_project_status(&self, project_id: &str, status: ProjectStatus)
    -> StoreResult<()>;

    /// List every stored entry of a project, ordered by path then name.
    async fn list_files(&self, project_id: &str) -> StoreResult<Vec<StoredFile>>;

    /// Look up an entry by its path relative to the project root.
    async fn get_file_by_path(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> StoreResult<Option<StoredFile>>;

    /// Insert an entry. Size is computed from the content.
    async fn create_file(&self, project_id: &str, file: NewFile) -> StoreResult<StoredFile>;

    /// Replace an entry's content; size is recomputed. Returns `None` if missing.
    async fn update_file(
        &self,
        file_id: &str,
        project_id: &str,
        content: &str,
    ) -> StoreResult<Option<StoredFile>>;

    /// Delete an entry. Returns whether a row was removed.
    async fn delete_file(&self, file_id: &str, project_id: &str) -> StoreResult<bool>;

    /// Environment variables of a project, ordered by key.
    async fn get_environment_variables(
        &self,
        project_id: &str,
    ) -> StoreResult<Vec<EnvironmentVariable>>;
}
