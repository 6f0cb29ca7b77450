use std::sync::Arc;
use std::time::Duration;

use aiagent_console::config::Config;
use aiagent_console::{http, AppState};
use tracing::info;

const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aiagent_console=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(Config::load());
    let state = AppState::new(Arc::clone(&config));
    state.registry.restore();

    let app = http::router(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    info!("aiagent-console listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    info!("shutting down, draining PTY output (up to {:?})", SHUTDOWN_DRAIN_DEADLINE);
    let drain = async { state.registry.persist_all_on_shutdown() };
    if tokio::time::timeout(SHUTDOWN_DRAIN_DEADLINE, drain).await.is_err() {
        tracing::warn!("shutdown drain exceeded {:?}, exiting anyway", SHUTDOWN_DRAIN_DEADLINE);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
