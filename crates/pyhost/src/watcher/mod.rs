//! Filesystem change watcher keeping stored trees in step with workspaces.
//!
//! One watcher runs per project. Raw notify events are fed through a
//! [`DebounceTable`] and each settled path is handed to a [`Reconciler`].

mod debounce;
mod reconcile;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::hub::LogHub;
use crate::store::{FileStore, StoreError};

pub use debounce::DebounceTable;
pub use reconcile::{Reconciler, RescanReport};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct WatchHandle {
    root: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    fn shutdown(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Registry of live per-project watchers.
#[derive(Clone)]
pub struct WatcherRegistry {
    watchers: Arc<DashMap<String, WatchHandle>>,
    store: Arc<dyn FileStore>,
    hub: LogHub,
    config: WatcherConfig,
}

impl WatcherRegistry {
    pub fn new(store: Arc<dyn FileStore>, hub: LogHub, config: WatcherConfig) -> Self {
        Self {
            watchers: Arc::new(DashMap::new()),
            store,
            hub,
            config,
        }
    }

    /// Start watching `root` for `project_id`, replacing any existing watcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, project_id: &str, root: &Path) -> Result<(), WatchError> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let mut watcher = notify::recommended_watcher(move |res| {
            if tx.blocking_send(res).is_err() {
                debug!("file watch channel closed");
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        let reconciler = Reconciler::new(
            self.store.clone(),
            self.hub.clone(),
            project_id,
            root.to_path_buf(),
        );
        let task = tokio::spawn(watch_loop(
            watcher,
            rx,
            reconciler,
            DebounceTable::new(self.config.debounce()),
            cancel.clone(),
        ));

        let handle = WatchHandle {
            root: root.to_path_buf(),
            cancel,
            task,
        };
        if let Some(previous) = self.watchers.insert(project_id.to_string(), handle) {
            previous.shutdown();
            debug!(project_id, "replaced existing watcher");
        }
        info!(project_id, root = %root.display(), "watching workspace");
        Ok(())
    }

    /// Stop a project's watcher. Returns whether one was running.
    pub fn stop(&self, project_id: &str) -> bool {
        match self.watchers.remove(project_id) {
            Some((_, handle)) => {
                handle.shutdown();
                info!(project_id, "stopped watching workspace");
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, project_id: &str) -> bool {
        self.watchers.contains_key(project_id)
    }

    /// Workspace directory watched for a project.
    pub fn watched_root(&self, project_id: &str) -> Option<PathBuf> {
        self.watchers.get(project_id).map(|h| h.root.clone())
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Reconciler for a workspace, independent of any running watcher.
    pub fn reconciler(&self, project_id: &str, root: &Path) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.hub.clone(),
            project_id,
            root.to_path_buf(),
        )
    }
}

/// Access events are raised by our own reads and carry no change.
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

async fn watch_loop(
    watcher: RecommendedWatcher,
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    reconciler: Reconciler,
    mut table: DebounceTable,
    cancel: CancellationToken,
) {
    // Dropping the watcher ends event delivery, so it lives as long as the loop.
    let _watcher = watcher;

    loop {
        let deadline = table.next_deadline();
        tokio::select! {
            _ = cancel.cancelled() => break,
            incoming = rx.recv() => {
                match incoming {
                    Some(Ok(event)) => {
                        if !is_relevant(&event.kind) {
                            continue;
                        }
                        let now = Instant::now();
                        for path in event.paths {
                            table.record(path, event.kind, now);
                        }
                    }
                    Some(Err(err)) => {
                        warn!("watcher error: {:?}", err);
                    }
                    None => break,
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                for (path, _kind) in table.take_due(Instant::now()) {
                    if let Err(e) = reconciler.reconcile_path(&path).await {
                        error!(
                            root = %reconciler.root().display(),
                            path = %path.display(),
                            "failed to reconcile workspace change: {}",
                            e
                        );
                    }
                }
            }
        }
    }
    debug!(root = %reconciler.root().display(), "watch loop finished");
}
