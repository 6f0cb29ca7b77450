//! Process-wide configuration, layered: `config.json` defaults, then
//! environment variable overrides. Constructed once in `main` and handed to
//! every subsystem by `Arc` -- there is no global mutable config state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_PORT: u16 = 4190;
const DEFAULT_VITE_PORT: u16 = 5173;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub vite_port: u16,
    pub log_dir: Option<String>,
    pub log_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            vite_port: DEFAULT_VITE_PORT,
            log_dir: None,
            log_enabled: false,
        }
    }
}

impl Config {
    /// Load `config.json` from the current working directory (if present),
    /// then apply environment variable overrides.
    pub fn load() -> Self {
        let mut config = Self::from_file(&PathBuf::from(CONFIG_FILE_NAME)).unwrap_or_default();

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.trim().parse() {
                config.port = parsed;
            } else {
                tracing::warn!("ignoring malformed PORT env var: {port:?}");
            }
        }

        config
    }

    fn from_file(path: &PathBuf) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}, using defaults", path.display());
                None
            }
        }
    }

    /// Shell program used to spawn tab PTYs: `$SHELL`, else `/bin/bash`.
    pub fn shell_program() -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
    }

    /// Base directory for all process state: `$AIAGENT_DATA_DIR`, else
    /// `<home>/.aiagent-console`. Mirrors the corpus's data-dir env override
    /// convention so tests and containers can redirect state without
    /// touching `$HOME`.
    pub fn data_dir() -> PathBuf {
        if let Ok(path) = std::env::var("AIAGENT_DATA_DIR") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".aiagent-console");
        }
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".aiagent-console");
        }

        PathBuf::from(".aiagent-console")
    }

    /// Base directory under which every agent's worktree is created:
    /// `<data_dir>/worktrees`.
    pub fn worktrees_base_dir() -> PathBuf {
        Self::data_dir().join("worktrees")
    }
}
