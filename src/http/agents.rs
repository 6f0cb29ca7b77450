use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::AppError;
use crate::worktree::MergeResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    agents: Vec<Agent>,
}

pub async fn list(State(state): State<AppState>) -> Json<AgentsResponse> {
    Json(AgentsResponse { agents: state.registry.list() })
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Agent>, AppError> {
    state.registry.get(&id).map(Json).ok_or_else(|| AppError::NotFound(id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    name: String,
    source_repo: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), AppError> {
    if body.name.trim().is_empty() || body.source_repo.trim().is_empty() {
        return Err(AppError::CallerInput("name and sourceRepo are required".to_string()));
    }

    let agent_id = Uuid::new_v4().to_string();
    let branch = format!("agents/{}", &agent_id[..8.min(agent_id.len())]);
    let base_dir = crate::config::Config::worktrees_base_dir();
    let source_repo = std::path::PathBuf::from(&body.source_repo);

    let (work_dir, branch) = state
        .worktree
        .create_worktree(&source_repo, &base_dir, &agent_id, &branch)?;

    let agent = state.registry.create(
        agent_id,
        body.name,
        body.source_repo.clone(),
        work_dir.to_string_lossy().into_owned(),
        branch,
    );

    state.settings.push_recent_repo(body.source_repo);

    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    let agent = state.registry.get(&id).ok_or_else(|| AppError::NotFound(id.clone()))?;
    state.registry.delete(&id)?;
    state
        .worktree
        .remove_worktree(std::path::Path::new(&agent.source_repo), std::path::Path::new(&agent.work_dir));
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<StatusResponse>, AppError> {
    let agent = state.registry.get(&id).ok_or_else(|| AppError::NotFound(id))?;
    let status = state.worktree.get_status(std::path::Path::new(&agent.work_dir))?;
    Ok(Json(StatusResponse { status }))
}

#[derive(Debug, Serialize)]
pub struct DiffResponse {
    diff: String,
}

pub async fn diff(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DiffResponse>, AppError> {
    let agent = state.registry.get(&id).ok_or_else(|| AppError::NotFound(id))?;
    let diff = state.worktree.get_diff(std::path::Path::new(&agent.work_dir))?;
    Ok(Json(DiffResponse { diff }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrRequest {
    title: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrResponse {
    pr_url: String,
}

pub async fn create_pr(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreatePrRequest>,
) -> Result<Json<CreatePrResponse>, AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::CallerInput("title is required".to_string()));
    }
    let agent = state.registry.get(&id).ok_or_else(|| AppError::NotFound(id))?;
    let pr_url = state
        .worktree
        .create_pull_request(std::path::Path::new(&agent.work_dir), &body.title, &body.body)?;
    Ok(Json(CreatePrResponse { pr_url }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    target_branch: Option<String>,
}

/// Always 200: `success` in the body distinguishes a clean merge from a
/// conflict, per §6/§7 (a merge conflict is not an HTTP error).
pub async fn merge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MergeRequest>,
) -> Result<Json<MergeResult>, AppError> {
    let agent = state.registry.get(&id).ok_or_else(|| AppError::NotFound(id))?;
    let result = state
        .worktree
        .try_local_merge(std::path::Path::new(&agent.work_dir), body.target_branch.as_deref())?;
    Ok(Json(result))
}
