//! Crate-wide HTTP-facing error type. Subsystem errors (`WorktreeError`,
//! `RegistryError`) convert into this via `#[from]`, following the corpus's
//! pattern of small per-module error enums funneling into one boundary type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::agent::registry::RegistryError;
use crate::worktree::WorktreeError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    CallerInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Worktree(#[from] WorktreeError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::CallerInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Worktree(WorktreeError::NotGitRepository(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Worktree(WorktreeError::TargetBranchUnknown) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Worktree(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
