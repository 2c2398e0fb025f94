//! Per-path debounce table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use notify::EventKind;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Pending {
    kind: EventKind,
    deadline: Instant,
}

/// Pending filesystem events keyed by path.
///
/// Every event pushes its path's deadline out by the window, so a path is
/// only released after it has been quiet for that long. Paths settle
/// independently of each other.
#[derive(Debug)]
pub struct DebounceTable {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl DebounceTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event for `path`, resetting its deadline.
    pub fn record(&mut self, path: PathBuf, kind: EventKind, now: Instant) {
        self.pending.insert(
            path,
            Pending {
                kind,
                deadline: now + self.window,
            },
        );
    }

    /// Earliest deadline among pending paths.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose deadline has passed, sorted so
    /// parents come before their children.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, EventKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut ready: Vec<(PathBuf, EventKind)> = due
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|p| (path, p.kind)))
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
