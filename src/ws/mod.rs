//! Subscriber Channel transport (C6): one axum WebSocket connection per
//! browser viewer, upgraded at `/ws`.

mod protocol;
mod subscriber;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| subscriber::handle_socket(socket, state))
}
