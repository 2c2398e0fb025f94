//! Test utilities and common setup.
#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use pyhost::api::{self, AppState};
use pyhost::config::{RuntimeConfig, WatcherConfig};
use pyhost::db::Database;
use pyhost::hub::{LogEvent, LogHub, LogSubscription};
use pyhost::store::{FileStore, NewFile, NewProject, Project, ProjectStatus, SqliteStore};
use pyhost::supervisor::{Supervisor, SupervisorSettings};
use tempfile::TempDir;

/// Everything a test needs: an in-memory store, a temporary workspace root
/// and a supervisor that runs entry files with `sh` instead of Python.
pub struct Harness {
    pub store: SqliteStore,
    pub hub: LogHub,
    pub supervisor: Supervisor,
    root: TempDir,
}

impl Harness {
    pub fn workspace_root(&self) -> &Path {
        self.root.path()
    }

    pub fn workspace(&self, project_id: &str) -> PathBuf {
        self.root.path().join(project_id)
    }

    pub fn router(&self) -> Router {
        api::create_router(AppState::new(
            self.store.clone(),
            self.supervisor.clone(),
            10,
        ))
    }

    /// Create a project whose entry file is `main` with the given files.
    pub async fn project_with_files(&self, main: Option<&str>, files: &[(&str, &str)]) -> Project {
        let mut new = NewProject::new("test project");
        if let Some(main) = main {
            new = new.with_main_file(main);
        }
        let project = self.store.create_project(new).await.expect("create project");
        for (relative, content) in files {
            let (parent, name) = pyhost::store::split_relative(relative);
            self.store
                .create_file(&project.id, NewFile::file(parent, name, *content))
                .await
                .expect("create file");
        }
        project
    }

    pub async fn status(&self, project_id: &str) -> ProjectStatus {
        self.store
            .get_project(project_id)
            .await
            .expect("get project")
            .expect("project exists")
            .status
    }

    /// Poll until the stored status matches.
    pub async fn wait_for_status(&self, project_id: &str, expected: ProjectStatus) {
        let store = self.store.clone();
        let id = project_id.to_string();
        wait_until(Duration::from_secs(10), || {
            let store = store.clone();
            let id = id.clone();
            async move {
                store
                    .get_project(&id)
                    .await
                    .ok()
                    .flatten()
                    .map(|p| p.status == expected)
                    .unwrap_or(false)
            }
        })
        .await
        .unwrap_or_else(|_| panic!("project {} never reached {}", project_id, expected));
    }

    /// Poll until the stored file at `relative` satisfies `check`.
    pub async fn wait_for_file<F>(&self, project_id: &str, relative: &str, check: F) -> bool
    where
        F: Fn(Option<&pyhost::store::StoredFile>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let file = self
                .store
                .get_file_by_path(project_id, relative)
                .await
                .expect("get file");
            if check(file.as_ref()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

pub fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        workspace_root: None,
        python_binary: "sh".to_string(),
        interpreter_args: Vec::new(),
        requirements_file: "requirements.txt".to_string(),
        pip_args: Vec::new(),
        stop_escalation_secs: 0,
    }
}

pub async fn harness() -> Harness {
    harness_with(runtime_config()).await
}

pub async fn harness_with(runtime: RuntimeConfig) -> Harness {
    let db = Database::in_memory().await.expect("in-memory database");
    let store = SqliteStore::new(db.pool().clone());
    let hub = LogHub::new(1024);
    let root = tempfile::tempdir().expect("temp workspace root");
    let supervisor = Supervisor::new(
        Arc::new(store.clone()),
        hub.clone(),
        SupervisorSettings {
            workspace_root: root.path().to_path_buf(),
            runtime,
            watcher: WatcherConfig {
                debounce_ms: 100,
                channel_capacity: 256,
            },
        },
    );
    Harness {
        store,
        hub,
        supervisor,
        root,
    }
}

/// Poll `check` every 50ms until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> Result<(), ()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Receive log lines until one contains `needle`. Returns everything seen.
pub async fn collect_until(sub: &mut LogSubscription, needle: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = sub.recv().await {
            if let LogEvent::Log { message } = event {
                let done = message.contains(needle);
                seen.push(message);
                if done {
                    return;
                }
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {:?}; saw {:?}",
        needle,
        seen
    );
    seen
}

/// Drain whatever is already buffered on a subscription.
pub fn drain(sub: &mut LogSubscription) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}
