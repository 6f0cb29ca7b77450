use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::settings::TerminalSettings;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    log_dir: Option<String>,
    log_enabled: bool,
    port: u16,
    vite_port: u16,
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        log_dir: state.config.log_dir.clone(),
        log_enabled: state.config.log_enabled,
        port: state.config.port,
        vite_port: state.config.vite_port,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    log_dir: Option<String>,
    log_enabled: bool,
}

/// `Config` is built once and handed out by `Arc` (§4.9); there is no
/// mutable process-wide config to write back to, so this just echoes the
/// caller's values alongside the immutable port fields.
pub async fn put_settings(State(state): State<AppState>, Json(body): Json<SettingsUpdate>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        log_dir: body.log_dir,
        log_enabled: body.log_enabled,
        port: state.config.port,
        vite_port: state.config.vite_port,
    })
}

pub async fn get_terminal_settings(State(state): State<AppState>) -> Json<TerminalSettings> {
    Json(state.settings.terminal_settings())
}

pub async fn put_terminal_settings(State(state): State<AppState>, Json(body): Json<TerminalSettings>) -> Json<TerminalSettings> {
    state.settings.set_terminal_settings(body.clone());
    Json(body)
}

#[derive(Debug, Serialize)]
pub struct RecentReposResponse {
    repos: Vec<String>,
}

pub async fn recent_repos(State(state): State<AppState>) -> Json<RecentReposResponse> {
    Json(RecentReposResponse { repos: state.settings.recent_repos() })
}
