//! Project, file and environment data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Run status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Not running (never started, or stopped on request).
    #[default]
    Stopped,
    /// A supervised interpreter process is alive.
    Running,
    /// Launch failed, or the process exited nonzero / was killed.
    Error,
    /// The process exited with code 0.
    Completed,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Stopped => write!(f, "stopped"),
            ProjectStatus::Running => write!(f, "running"),
            ProjectStatus::Error => write!(f, "error"),
            ProjectStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stopped" => Ok(ProjectStatus::Stopped),
            "running" => Ok(ProjectStatus::Running),
            "error" => Ok(ProjectStatus::Error),
            "completed" => Ok(ProjectStatus::Completed),
            _ => Err(format!("unknown project status: {}", s)),
        }
    }
}

/// A hosted Python project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    /// Account that owns the project.
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Entry-point file, relative to the workspace root.
    pub main_file: Option<String>,
    /// Interpreter version tag (informational).
    pub python_version: String,
    /// Install `requirements.txt` before each start.
    pub auto_install_requirements: bool,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    /// The configured entry file, if any non-blank one is set.
    pub fn entry_file(&self) -> Option<&str> {
        self.main_file
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Fields for creating a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    #[serde(default = "default_owner")]
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub main_file: Option<String>,
    #[serde(default = "default_python_version")]
    pub python_version: String,
    #[serde(default)]
    pub auto_install_requirements: bool,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            owner_id: default_owner(),
            name: name.into(),
            description: None,
            main_file: None,
            python_version: default_python_version(),
            auto_install_requirements: false,
        }
    }

    pub fn with_main_file(mut self, main_file: impl Into<String>) -> Self {
        self.main_file = Some(main_file.into());
        self
    }

    pub fn with_auto_install(mut self, enabled: bool) -> Self {
        self.auto_install_requirements = enabled;
        self
    }
}

fn default_owner() -> String {
    "local".to_string()
}

fn default_python_version() -> String {
    "3.11".to_string()
}

/// Partial update of project settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub main_file: Option<String>,
    pub python_version: Option<String>,
    pub auto_install_requirements: Option<bool>,
}

/// One file or directory of a project's stored tree.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Parent path relative to the project root; empty for root entries.
    pub path: String,
    pub content: String,
    pub size: i64,
    pub is_directory: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredFile {
    /// Path of this entry relative to the project root.
    pub fn relative_path(&self) -> String {
        join_relative(&self.path, &self.name)
    }
}

/// Fields for inserting a stored entry. Size is derived from `content`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_directory: bool,
}

impl NewFile {
    /// A regular file under `path`.
    pub fn file(path: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            content: content.into(),
            is_directory: false,
        }
    }

    /// A directory under `path`.
    pub fn directory(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            content: String::new(),
            is_directory: true,
        }
    }

    /// Byte size recorded for this entry.
    pub fn size(&self) -> i64 {
        if self.is_directory {
            0
        } else {
            self.content.len() as i64
        }
    }
}

/// A project environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    pub id: String,
    pub project_id: String,
    pub key: String,
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Key/value pair used when replacing a project's variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Join a parent path and a name with `/`, treating an empty parent as root.
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a relative path into `(parent, name)`.
pub fn split_relative(relative: &str) -> (&str, &str) {
    let relative = relative.trim_matches('/');
    match relative.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", relative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ProjectStatus::Stopped,
            ProjectStatus::Running,
            ProjectStatus::Error,
            ProjectStatus::Completed,
        ] {
            assert_eq!(status.to_string().parse::<ProjectStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ProjectStatus>().is_err());
    }

    #[test]
    fn test_split_and_join_relative() {
        assert_eq!(split_relative("output.json"), ("", "output.json"));
        assert_eq!(split_relative("data/logs/run.txt"), ("data/logs", "run.txt"));
        assert_eq!(join_relative("", "bot.py"), "bot.py");
        assert_eq!(join_relative("pkg", "mod.py"), "pkg/mod.py");
    }

    #[test]
    fn test_new_file_size_counts_bytes() {
        let file = NewFile::file("", "hello.txt", "héllo");
        assert_eq!(file.size(), 6);
        assert_eq!(NewFile::directory("", "data").size(), 0);
    }

    #[test]
    fn test_entry_file_ignores_blank() {
        let mut project = Project {
            id: "p".into(),
            owner_id: "o".into(),
            name: "n".into(),
            description: None,
            main_file: Some("   ".into()),
            python_version: "3.11".into(),
            auto_install_requirements: false,
            status: ProjectStatus::Stopped,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(project.entry_file(), None);
        project.main_file = Some("bot.py".into());
        assert_eq!(project.entry_file(), Some("bot.py"));
    }
}
