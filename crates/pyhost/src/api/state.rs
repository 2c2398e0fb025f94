//! Application state shared across handlers.

use crate::store::SqliteStore;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    /// Project, file and variable CRUD.
    pub store: SqliteStore,
    /// Processes, watchers and log streams.
    pub supervisor: Supervisor,
    /// Request body limit for uploads, in bytes.
    pub max_body_bytes: usize,
    /// CORS origins; empty allows any.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(store: SqliteStore, supervisor: Supervisor, max_upload_mb: usize) -> Self {
        Self {
            store,
            supervisor,
            max_body_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}
