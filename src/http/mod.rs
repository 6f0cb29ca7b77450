//! HTTP surface (§6): agent CRUD + worktree operations, settings, recent
//! repos, and the ambient `/healthz` liveness probe.

mod agents;
mod health;
mod settings;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agents", get(agents::list).post(agents::create))
        .route("/api/agents/:id", get(agents::get).delete(agents::delete))
        .route("/api/agents/:id/status", get(agents::status))
        .route("/api/agents/:id/diff", get(agents::diff))
        .route("/api/agents/:id/pr", post(agents::create_pr))
        .route("/api/agents/:id/merge", post(agents::merge))
        .route("/api/settings", get(settings::get_settings).put(settings::put_settings))
        .route(
            "/api/terminal-settings",
            get(settings::get_terminal_settings).put(settings::put_terminal_settings),
        )
        .route("/api/recent-repos", get(settings::recent_repos))
        .route("/healthz", get(health::healthz))
        .route("/ws", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
