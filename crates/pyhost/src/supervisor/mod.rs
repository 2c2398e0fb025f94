//! Process supervisor: one interpreter process per project.
//!
//! A start prepares the workspace, optionally installs requirements, spawns
//! the interpreter and hands the child to a monitor task. Exits travel as
//! messages to a single control loop that frees the slot before it writes
//! the terminal status.

mod monitor;
mod slots;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{RuntimeConfig, WatcherConfig};
use crate::hub::LogHub;
use crate::runner::{self, Forward, PipCommand, RunError};
use crate::store::{FileStore, Project, ProjectStatus, StoreError, StoredFile};
use crate::watcher::{RescanReport, WatchError, WatcherRegistry};
use crate::workspace::{self, WorkspaceError, Workspaces};

use monitor::{ExitNotice, MonitorArgs};
use slots::{SlotState, SlotTable};

/// Errors returned by supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("no main file configured")]
    NoEntryFile,

    #[error("main file not found: {0}")]
    EntryFileMissing(String),

    #[error("project is already running")]
    AlreadyRunning,

    /// One-shot commands are refused while the project's process is alive.
    #[error("stop the running process first")]
    ProjectRunning,

    #[error("failed to start process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("start was cancelled by a stop request")]
    Cancelled,

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Command(#[from] RunError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Settings the supervisor needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub workspace_root: PathBuf,
    pub runtime: RuntimeConfig,
    pub watcher: WatcherConfig,
}

/// Owner of every project's process slot, watcher and output stream.
///
/// Cheap to clone; clones share state. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Supervisor {
    store: Arc<dyn FileStore>,
    hub: LogHub,
    watchers: WatcherRegistry,
    workspaces: Workspaces,
    runtime: RuntimeConfig,
    pip: PipCommand,
    slots: SlotTable,
    exits: mpsc::UnboundedSender<ExitNotice>,
}

impl Supervisor {
    pub fn new(store: Arc<dyn FileStore>, hub: LogHub, settings: SupervisorSettings) -> Self {
        let slots = SlotTable::default();
        let (exits, exit_rx) = mpsc::unbounded_channel();
        monitor::spawn_control_loop(exit_rx, slots.clone(), store.clone(), hub.clone());

        let watchers = WatcherRegistry::new(store.clone(), hub.clone(), settings.watcher);
        let pip = PipCommand::new(
            settings.runtime.python_binary.clone(),
            settings.runtime.pip_args.clone(),
        );

        Self {
            store,
            hub,
            watchers,
            workspaces: Workspaces::new(settings.workspace_root),
            runtime: settings.runtime,
            pip,
            slots,
            exits,
        }
    }

    pub fn hub(&self) -> &LogHub {
        &self.hub
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    /// Whether a supervised process is alive for the project.
    pub fn is_running(&self, project_id: &str) -> bool {
        self.slots.is_running(project_id)
    }

    /// Start the project's entry file. Returns the process id.
    pub async fn start(&self, project_id: &str) -> Result<u32, SupervisorError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SupervisorError::ProjectNotFound(project_id.to_string()))?;
        let entry = project
            .entry_file()
            .ok_or(SupervisorError::NoEntryFile)?
            .to_string();

        let reservation = self
            .slots
            .reserve(project_id)
            .ok_or(SupervisorError::AlreadyRunning)?;
        let generation = reservation.generation();

        let dir = self.workspaces.dir(project_id)?;
        if let Err(e) =
            workspace::materialize(self.store.as_ref(), &self.hub, project_id, &dir).await
        {
            self.hub.log(project_id, format!("❌ {}\n", e));
            self.fail(project_id).await;
            return Err(e.into());
        }
        self.watch(project_id, &dir);

        let entry_path = match workspace::resolve_path(&dir, &entry) {
            Ok(path) => path,
            Err(e) => {
                self.hub.log(project_id, format!("❌ {}\n", e));
                self.fail(project_id).await;
                return Err(e.into());
            }
        };
        if !tokio::fs::try_exists(&entry_path).await.unwrap_or(false) {
            self.hub
                .log(project_id, format!("❌ Main file not found: {}\n", entry));
            self.fail(project_id).await;
            return Err(SupervisorError::EntryFileMissing(entry));
        }
        self.hub
            .log(project_id, format!("✓ Main file found: {}\n", entry));

        self.prepare_requirements(&project, &dir).await?;

        let envs = self.project_env(project_id).await?;

        self.hub
            .log(project_id, format!("\n🚀 Starting {}...\n", entry));
        self.hub
            .log(project_id, format!("Working directory: {}\n", dir.display()));

        let spawned = Command::new(&self.runtime.python_binary)
            .args(&self.runtime.interpreter_args)
            .arg(&entry)
            .current_dir(&dir)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(project_id, "failed to spawn {}: {}", self.runtime.python_binary, e);
                self.hub
                    .log(project_id, format!("❌ Failed to start process: {}\n", e));
                self.fail(project_id).await;
                return Err(SupervisorError::Spawn(e));
            }
        };
        let Some(pid) = child.id() else {
            let exit = crate::process::kill_and_reap(&mut child).await;
            self.fail(project_id).await;
            return Err(SupervisorError::Spawn(std::io::Error::other(format!(
                "process {} before it could be registered",
                exit.describe()
            ))));
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        if reservation.promote(pid, stop_tx).is_err() {
            info!(project_id, pid, "start cancelled, terminating fresh process");
            crate::process::kill_and_reap(&mut child).await;
            return Err(SupervisorError::Cancelled);
        }

        if let Err(e) = self
            .store
            .set_project_status(project_id, ProjectStatus::Running)
            .await
        {
            error!(project_id, "failed to persist running status: {}", e);
        }
        info!(project_id, pid, entry = %entry_path.display(), "process started");
        self.hub
            .log(project_id, format!("✓ Process started with PID: {}\n", pid));
        self.hub.log(
            project_id,
            "\n✓ Application is now running\n\n--- Application Output ---\n",
        );

        let relay = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => {
                monitor::spawn_relay(self.hub.clone(), project_id.to_string(), stdout, stderr)
            }
            _ => tokio::spawn(async {}),
        };
        monitor::spawn_monitor(
            child,
            MonitorArgs {
                project_id: project_id.to_string(),
                generation,
                pid,
                stop_rx,
                escalation: self.runtime.stop_escalation(),
                relay,
                exits: self.exits.clone(),
            },
        );

        Ok(pid)
    }

    /// Stop the project's process. Without one, just record `stopped`.
    ///
    /// Returns whether a live process was signalled. The watcher keeps running.
    pub async fn stop(&self, project_id: &str) -> Result<bool, SupervisorError> {
        let signalled = self.release_slot(project_id);
        if signalled {
            self.hub.log(project_id, "⏹️ Process stopped\n");
        }
        self.store
            .set_project_status(project_id, ProjectStatus::Stopped)
            .await?;
        Ok(signalled)
    }

    /// Stop every process, e.g. on shutdown.
    pub fn stop_all(&self) {
        for project_id in self.slots.project_ids() {
            self.release_slot(&project_id);
        }
    }

    /// Tear down everything attached to a project before it is deleted.
    pub async fn retire(&self, project_id: &str) -> Result<(), SupervisorError> {
        self.release_slot(project_id);
        self.watchers.stop(project_id);
        self.workspaces.remove(project_id).await?;
        Ok(())
    }

    /// The project with its stored status reconciled against the live slot.
    pub async fn project(&self, project_id: &str) -> Result<Option<Project>, SupervisorError> {
        let Some(mut project) = self.store.get_project(project_id).await? else {
            return Ok(None);
        };
        let running = self.is_running(project_id);
        let corrected = match project.status {
            ProjectStatus::Running if !running => Some(ProjectStatus::Stopped),
            ProjectStatus::Stopped if running => Some(ProjectStatus::Running),
            _ => None,
        };
        if let Some(status) = corrected {
            debug!(project_id, from = %project.status, to = %status, "reconciling stored status");
            self.store.set_project_status(project_id, status).await?;
            project.status = status;
        }
        Ok(Some(project))
    }

    /// Run a shell command in the project's workspace.
    pub async fn execute_command(
        &self,
        project_id: &str,
        command: &str,
    ) -> Result<String, SupervisorError> {
        if self.slots.is_occupied(project_id) {
            return Err(SupervisorError::ProjectRunning);
        }
        let dir = self.workspaces.dir(project_id)?;
        let envs = self.project_env(project_id).await?;
        Ok(runner::execute_shell(command, &dir, envs).await?)
    }

    pub async fn install_package(
        &self,
        project_id: &str,
        package: &str,
    ) -> Result<String, SupervisorError> {
        if self.slots.is_occupied(project_id) {
            return Err(SupervisorError::ProjectRunning);
        }
        let dir = self.workspaces.ensure(project_id).await?;
        Ok(self.pip.install_package(&dir, package).await?)
    }

    pub async fn uninstall_package(
        &self,
        project_id: &str,
        package: &str,
    ) -> Result<String, SupervisorError> {
        if self.slots.is_occupied(project_id) {
            return Err(SupervisorError::ProjectRunning);
        }
        let dir = self.workspaces.ensure(project_id).await?;
        Ok(self.pip.uninstall_package(&dir, package).await?)
    }

    /// Walk the workspace and pull new or changed files into the store.
    pub async fn rescan_workspace(&self, project_id: &str) -> Result<RescanReport, SupervisorError> {
        let dir = self.workspaces.dir(project_id)?;
        let report = self.watchers.reconciler(project_id, &dir).rescan().await?;
        Ok(report)
    }

    /// Make sure the workspace directory exists and is being watched.
    pub async fn prepare_workspace(&self, project_id: &str) -> Result<PathBuf, SupervisorError> {
        let dir = self.workspaces.ensure(project_id).await?;
        if self.watchers.watched_root(project_id).as_deref() != Some(dir.as_path()) {
            self.watchers.start(project_id, &dir)?;
        }
        Ok(dir)
    }

    fn watch(&self, project_id: &str, dir: &Path) {
        if let Err(e) = self.watchers.start(project_id, dir) {
            warn!(project_id, "failed to watch workspace: {}", e);
        }
    }

    /// Empty the slot and signal its process if it has one.
    fn release_slot(&self, project_id: &str) -> bool {
        match self.slots.take(project_id).map(|slot| slot.state) {
            Some(SlotState::Running { pid, stop_tx }) => {
                info!(project_id, pid, "stopping process");
                if stop_tx.send(()).is_err() {
                    debug!(project_id, pid, "monitor already gone");
                }
                true
            }
            Some(SlotState::Starting) => {
                debug!(project_id, "cancelled a start in progress");
                false
            }
            None => false,
        }
    }

    async fn fail(&self, project_id: &str) {
        if let Err(e) = self
            .store
            .set_project_status(project_id, ProjectStatus::Error)
            .await
        {
            error!(project_id, "failed to persist error status: {}", e);
        }
    }

    async fn project_env(&self, project_id: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .store
            .get_environment_variables(project_id)
            .await?
            .into_iter()
            .map(|var| (var.key, var.value))
            .collect())
    }

    /// Install the requirements manifest if the project has one. Failures are
    /// reported to the log stream only.
    async fn prepare_requirements(&self, project: &Project, dir: &Path) -> Result<(), SupervisorError> {
        let project_id = project.id.as_str();
        let manifest_name = self.runtime.requirements_file.as_str();
        let Some(manifest) = self
            .store
            .list_files(project_id)
            .await?
            .into_iter()
            .find(|f| is_manifest(f, manifest_name))
        else {
            return Ok(());
        };

        self.hub
            .log(project_id, format!("ℹ️ {} detected.\n", manifest_name));

        if !project.auto_install_requirements {
            self.hub.log(
                project_id,
                format!("ℹ️ Auto-install from {} is disabled.\n", manifest_name),
            );
            self.hub.log(
                project_id,
                "ℹ️ Please install packages manually using the Terminal tab:\n",
            );
            self.hub.log(
                project_id,
                format!("ℹ️ Run: pip install --user -r {}\n", manifest_name),
            );
            return Ok(());
        }

        self.hub.log(
            project_id,
            format!("📦 Auto-installing packages from {}...\n", manifest_name),
        );
        let manifest_path = workspace::resolve_path(dir, &manifest.relative_path())?;
        let forward = Forward {
            hub: &self.hub,
            project_id,
        };
        match self
            .pip
            .install_requirements(dir, &manifest_path, forward)
            .await
        {
            Ok(_) => self.hub.log(
                project_id,
                format!("\n✅ Packages installed successfully from {}\n", manifest_name),
            ),
            Err(e) => {
                warn!(project_id, "requirements install failed: {}", e);
                self.hub
                    .log(project_id, format!("\n❌ Failed to install packages: {}\n", e));
                self.hub.log(
                    project_id,
                    "ℹ️ You can install packages manually from the Terminal tab\n",
                );
            }
        }
        Ok(())
    }
}

fn is_manifest(file: &StoredFile, manifest_name: &str) -> bool {
    !file.is_directory && file.name == manifest_name && !file.content.trim().is_empty()
}
