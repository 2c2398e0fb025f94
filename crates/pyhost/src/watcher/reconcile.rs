//! Disk to store reconciliation for one project workspace.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::WatchError;
use crate::hub::{LogEvent, LogHub, SyncAction};
use crate::store::{FileStore, NewFile, StoredFile, split_relative};
use crate::workspace::{is_hidden, relative_path};

/// Counts of what a rescan changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RescanReport {
    pub created: usize,
    pub updated: usize,
    /// Entries that could not be read or stored.
    pub failed: usize,
}

impl RescanReport {
    fn record(&mut self, result: Result<Option<SyncAction>, WatchError>) -> Option<WatchError> {
        match result {
            Ok(Some(SyncAction::Created)) => self.created += 1,
            Ok(Some(SyncAction::Updated)) => self.updated += 1,
            Ok(_) => {}
            Err(e) => {
                self.failed += 1;
                return Some(e);
            }
        }
        None
    }
}

/// Applies the disk state of workspace paths to the stored tree.
///
/// Only ever writes to the store; the workspace itself is never touched.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn FileStore>,
    hub: LogHub,
    project_id: String,
    root: PathBuf,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn FileStore>,
        hub: LogHub,
        project_id: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            hub,
            project_id: project_id.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bring the stored entry for `path` in line with what is on disk now.
    pub async fn reconcile_path(&self, path: &Path) -> Result<Option<SyncAction>, WatchError> {
        let Some(relative) = relative_path(&self.root, path) else {
            return Ok(None);
        };
        if relative.is_empty() || is_hidden(&relative) {
            return Ok(None);
        }

        // Links are never followed; their targets may live outside the workspace.
        let metadata = match fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.remove_entry(&relative).await,
            Err(source) => {
                return Err(WatchError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if metadata.file_type().is_symlink() {
            debug!(project_id = %self.project_id, path = %relative, "skipping symlink");
            return Ok(None);
        }

        if metadata.is_dir() {
            let action = self.sync_directory(&relative).await?;
            if action.is_some() {
                // Entries written before the new directory was watched raise no events.
                self.scan_subtree(path).await;
            }
            Ok(action)
        } else if metadata.is_file() {
            self.sync_file(path, &relative).await
        } else {
            Ok(None)
        }
    }

    /// Walk the whole workspace and insert or update every visible entry.
    ///
    /// Directories are handled first, depth-first, then files. Nothing is
    /// deleted. An entry that fails is logged and counted; the walk goes on.
    pub async fn rescan(&self) -> Result<RescanReport, WatchError> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(RescanReport::default());
        }

        let report = self.apply_tree(&self.root).await;
        debug!(
            project_id = %self.project_id,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "workspace rescanned"
        );
        Ok(report)
    }

    async fn scan_subtree(&self, dir: &Path) {
        self.apply_tree(dir).await;
    }

    async fn apply_tree(&self, start: &Path) -> RescanReport {
        let mut report = RescanReport::default();
        let (dirs, files) = self.collect_entries(start);
        for relative in dirs {
            if let Some(e) = report.record(self.sync_directory(&relative).await) {
                warn!(project_id = %self.project_id, path = %relative, "sync failed: {}", e);
            }
        }
        for (full, relative) in files {
            if let Some(e) = report.record(self.sync_file(&full, &relative).await) {
                warn!(project_id = %self.project_id, path = %relative, "sync failed: {}", e);
            }
        }
        report
    }

    /// Visible directories (pre-order) and files below `start`.
    fn collect_entries(&self, start: &Path) -> (Vec<String>, Vec<(PathBuf, String)>) {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let walker = WalkDir::new(start)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !name.starts_with('.'))
                    .unwrap_or(false)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(project_id = %self.project_id, "walk error: {}", e);
                    continue;
                }
            };
            let Some(relative) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_dir() {
                dirs.push(relative);
            } else if file_type.is_file() {
                files.push((entry.path().to_path_buf(), relative));
            }
        }
        (dirs, files)
    }

    async fn sync_directory(&self, relative: &str) -> Result<Option<SyncAction>, WatchError> {
        if self
            .store
            .get_file_by_path(&self.project_id, relative)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let (parent, name) = split_relative(relative);
        self.store
            .create_file(&self.project_id, NewFile::directory(parent, name))
            .await?;
        self.announce(SyncAction::Created, relative, "📁 Folder created");
        Ok(Some(SyncAction::Created))
    }

    async fn sync_file(&self, full: &Path, relative: &str) -> Result<Option<SyncAction>, WatchError> {
        let bytes = match fs::read(full).await {
            Ok(bytes) => bytes,
            // Gone between the event and the read; the removal event follows.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(WatchError::Io {
                    path: full.to_path_buf(),
                    source,
                });
            }
        };
        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) => {
                warn!(project_id = %self.project_id, path = %relative, "skipping non-UTF-8 file");
                return Ok(None);
            }
        };

        match self.store.get_file_by_path(&self.project_id, relative).await? {
            None => {
                let (parent, name) = split_relative(relative);
                self.store
                    .create_file(&self.project_id, NewFile::file(parent, name, content))
                    .await?;
                self.announce(SyncAction::Created, relative, "📄 File created");
                Ok(Some(SyncAction::Created))
            }
            Some(existing) if existing.is_directory => {
                debug!(project_id = %self.project_id, path = %relative, "file replaces stored directory, ignoring");
                Ok(None)
            }
            Some(existing) if existing.content == content => Ok(None),
            Some(existing) => {
                self.store
                    .update_file(&existing.id, &self.project_id, &content)
                    .await?;
                self.announce(SyncAction::Updated, relative, "✏️ File updated");
                Ok(Some(SyncAction::Updated))
            }
        }
    }

    async fn remove_entry(&self, relative: &str) -> Result<Option<SyncAction>, WatchError> {
        let Some(existing) = self
            .store
            .get_file_by_path(&self.project_id, relative)
            .await?
        else {
            return Ok(None);
        };

        if existing.is_directory {
            let prefix = format!("{}/", relative);
            let descendants: Vec<StoredFile> = self
                .store
                .list_files(&self.project_id)
                .await?
                .into_iter()
                .filter(|f| f.relative_path().starts_with(&prefix))
                .collect();
            for file in descendants {
                self.store.delete_file(&file.id, &self.project_id).await?;
            }
        }

        self.store
            .delete_file(&existing.id, &self.project_id)
            .await?;
        let label = if existing.is_directory {
            "🗑️ Folder deleted"
        } else {
            "🗑️ File deleted"
        };
        self.announce(SyncAction::Deleted, relative, label);
        Ok(Some(SyncAction::Deleted))
    }

    fn announce(&self, action: SyncAction, relative: &str, label: &str) {
        debug!(project_id = %self.project_id, path = %relative, %action, "synced workspace change");
        self.hub
            .log(&self.project_id, format!("{}: {}\n", label, relative));
        self.hub.emit(
            &self.project_id,
            LogEvent::FilesSynced {
                action,
                path: relative.to_string(),
            },
        );
    }
}
