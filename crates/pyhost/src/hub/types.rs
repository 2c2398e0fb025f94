//! Events delivered to log subscribers.

use serde::Serialize;

/// Prefix applied to text read from a process's standard error.
pub const STDERR_TAG: &str = "[ERROR] ";

/// What the watcher did to a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncAction::Created => write!(f, "created"),
            SyncAction::Updated => write!(f, "updated"),
            SyncAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// One item published for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A line (or chunk) of human-readable output.
    Log { message: String },
    /// The stored tree changed because of a workspace edit.
    FilesSynced { action: SyncAction, path: String },
}

impl LogEvent {
    pub fn log(message: impl Into<String>) -> Self {
        LogEvent::Log {
            message: message.into(),
        }
    }

    pub fn stderr(message: impl AsRef<str>) -> Self {
        LogEvent::Log {
            message: format!("{}{}", STDERR_TAG, message.as_ref()),
        }
    }

    /// The text of a log event, `None` for sync notifications.
    pub fn message(&self) -> Option<&str> {
        match self {
            LogEvent::Log { message } => Some(message),
            LogEvent::FilesSynced { .. } => None,
        }
    }
}
