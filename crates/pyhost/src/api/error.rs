//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::archive::ArchiveError;
use crate::runner::RunError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;
use crate::workspace::WorkspaceError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let body = ErrorResponse {
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::PathTraversal(_) => ApiError::Forbidden(err.to_string()),
            WorkspaceError::InvalidProjectId(_) => ApiError::BadRequest(err.to_string()),
            WorkspaceError::Io { .. } => ApiError::Internal(err.to_string()),
            WorkspaceError::Store(e) => e.into(),
        }
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Failed(_) | RunError::InvalidPackage(_) => {
                ApiError::BadRequest(err.to_string())
            }
            RunError::Spawn { .. } | RunError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::ProjectNotFound(id) => ApiError::NotFound(format!("project {}", id)),
            SupervisorError::NoEntryFile | SupervisorError::EntryFileMissing(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SupervisorError::AlreadyRunning
            | SupervisorError::ProjectRunning
            | SupervisorError::Cancelled => ApiError::Conflict(err.to_string()),
            SupervisorError::Spawn(_) | SupervisorError::Watch(_) => {
                ApiError::Internal(err.to_string())
            }
            SupervisorError::Workspace(e) => e.into(),
            SupervisorError::Store(e) => e.into(),
            SupervisorError::Command(e) => e.into(),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Store(e) => e.into(),
            ArchiveError::UnsafePath(_) => ApiError::Forbidden(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
