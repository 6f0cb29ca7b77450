//! Multiplexing console backend.
//!
//! A long-running async HTTP + WebSocket server that lets several browsers
//! share live PTY sessions running inside isolated git worktrees. The
//! process is organized as:
//! - `agent`: the agent/tab data model, per-tab sequenced output buffer,
//!   PTY-owning tab sessions, the control-owner lock, and the registry
//!   tying them together.
//! - `worktree`: git worktree creation/removal and the local-merge/PR flow.
//! - `bus`: the in-process publish/subscribe event bus.
//! - `ws`: the per-viewer duplex WebSocket protocol and subscriber state
//!   machine.
//! - `http`: the REST surface over agents, settings, and recent repos.
//! - `settings`: durable JSON-file persistence for recent repos, terminal
//!   prefs, and persisted agent records.
//! - `config`, `error`: ambient configuration and the HTTP-facing error type.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod http;
pub mod settings;
pub mod worktree;
pub mod ws;

use std::sync::Arc;

use agent::control::ControlLock;
use agent::registry::AgentRegistry;
use bus::EventBus;
use config::Config;
use settings::SettingsStore;
use worktree::WorktreeCoordinator;

/// Shared process state handed to every HTTP/WS handler. Every field is an
/// `Arc`, so `AppState` itself is cheap to `Clone` into each request, as
/// axum's `State` extractor requires.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<AgentRegistry>,
    pub control: Arc<ControlLock>,
    pub bus: Arc<EventBus>,
    pub worktree: Arc<WorktreeCoordinator>,
    pub settings: Arc<SettingsStore>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let bus = Arc::new(EventBus::new());
        let control = Arc::new(ControlLock::new());
        let settings = Arc::new(SettingsStore::load(&Config::data_dir()));
        let registry = AgentRegistry::new(&config, Arc::clone(&bus), Arc::clone(&control), settings.clone());

        Self {
            config,
            registry,
            control,
            bus,
            worktree: Arc::new(WorktreeCoordinator::new()),
            settings,
        }
    }
}
