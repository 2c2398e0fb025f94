//! SQLite-backed store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{
    EnvVar, EnvironmentVariable, NewFile, NewProject, Project, ProjectStatus, ProjectUpdate,
    StoredFile, split_relative,
};
use super::{FileStore, StoreError, StoreResult};

const PROJECT_COLUMNS: &str = r#"
    id, owner_id, name, description, main_file, python_version,
    auto_install_requirements, status, created_at, updated_at
"#;

const FILE_COLUMNS: &str = r#"
    id, project_id, name, path, content, size, is_directory, created_at, updated_at
"#;

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Store implementation over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a project.
    pub async fn create_project(&self, new: NewProject) -> StoreResult<Project> {
        let id = Uuid::new_v4().to_string();
        let ts = now();
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, owner_id, name, description, main_file, python_version,
                auto_install_requirements, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.owner_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.main_file)
        .bind(&new.python_version)
        .bind(new.auto_install_requirements)
        .bind(ProjectStatus::Stopped.to_string())
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        self.get_project(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {}", id)))
    }

    /// List projects, newest first.
    pub async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let query = format!(
            "SELECT {} FROM projects ORDER BY created_at DESC",
            PROJECT_COLUMNS
        );
        let projects = sqlx::query_as::<_, Project>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(projects)
    }

    /// Apply a partial settings update. Returns `None` if the project is missing.
    pub async fn update_project(
        &self,
        project_id: &str,
        update: ProjectUpdate,
    ) -> StoreResult<Option<Project>> {
        let Some(current) = self.get_project(project_id).await? else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE projects
            SET name = ?, description = ?, main_file = ?, python_version = ?,
                auto_install_requirements = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.name.unwrap_or(current.name))
        .bind(update.description.or(current.description))
        .bind(update.main_file.or(current.main_file))
        .bind(update.python_version.unwrap_or(current.python_version))
        .bind(
            update
                .auto_install_requirements
                .unwrap_or(current.auto_install_requirements),
        )
        .bind(now())
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        self.get_project(project_id).await
    }

    /// Delete a project together with its files and variables.
    pub async fn delete_project(&self, project_id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM environment_variables WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch one entry by id.
    pub async fn get_file(&self, file_id: &str, project_id: &str) -> StoreResult<Option<StoredFile>> {
        let query = format!(
            "SELECT {} FROM files WHERE id = ? AND project_id = ?",
            FILE_COLUMNS
        );
        let file = sqlx::query_as::<_, StoredFile>(&query)
            .bind(file_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    /// Replace the whole variable set of a project (delete-all-then-insert).
    pub async fn set_environment_variables(
        &self,
        project_id: &str,
        vars: &[EnvVar],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM environment_variables WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        let ts = now();
        for var in vars {
            sqlx::query(
                r#"
                INSERT INTO environment_variables (id, project_id, key, value, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(project_id)
            .bind(&var.key)
            .bind(&var.value)
            .bind(&ts)
            .bind(&ts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl FileStore for SqliteStore {
    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        let query = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    async fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(now())
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_files(&self, project_id: &str) -> StoreResult<Vec<StoredFile>> {
        let query = format!(
            "SELECT {} FROM files WHERE project_id = ? ORDER BY path, name",
            FILE_COLUMNS
        );
        let files = sqlx::query_as::<_, StoredFile>(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(files)
    }

    async fn get_file_by_path(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> StoreResult<Option<StoredFile>> {
        let (parent, name) = split_relative(relative_path);
        let query = format!(
            "SELECT {} FROM files WHERE project_id = ? AND path = ? AND name = ?",
            FILE_COLUMNS
        );
        let file = sqlx::query_as::<_, StoredFile>(&query)
            .bind(project_id)
            .bind(parent)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    async fn create_file(&self, project_id: &str, file: NewFile) -> StoreResult<StoredFile> {
        let id = Uuid::new_v4().to_string();
        let ts = now();
        let size = file.size();
        let content = if file.is_directory {
            String::new()
        } else {
            file.content
        };

        sqlx::query(
            r#"
            INSERT INTO files (
                id, project_id, name, path, content, size, is_directory, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(&file.name)
        .bind(&file.path)
        .bind(&content)
        .bind(size)
        .bind(file.is_directory)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::from_insert(e, super::join_relative(&file.path, &file.name))
        })?;

        Ok(StoredFile {
            id,
            project_id: project_id.to_string(),
            name: file.name,
            path: file.path,
            content,
            size,
            is_directory: file.is_directory,
            created_at: ts.clone(),
            updated_at: ts,
        })
    }

    async fn update_file(
        &self,
        file_id: &str,
        project_id: &str,
        content: &str,
    ) -> StoreResult<Option<StoredFile>> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET content = ?, size = ?, updated_at = ?
            WHERE id = ? AND project_id = ? AND is_directory = 0
            "#,
        )
        .bind(content)
        .bind(content.len() as i64)
        .bind(now())
        .bind(file_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_file(file_id, project_id).await
    }

    async fn delete_file(&self, file_id: &str, project_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND project_id = ?")
            .bind(file_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_environment_variables(
        &self,
        project_id: &str,
    ) -> StoreResult<Vec<EnvironmentVariable>> {
        let vars = sqlx::query_as::<_, EnvironmentVariable>(
            r#"
            SELECT id, project_id, key, value, created_at, updated_at
            FROM environment_variables
            WHERE project_id = ?
            ORDER BY key
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(vars)
    }
}
