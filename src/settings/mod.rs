//! Settings / Recent-repos store (C8, §4.8): one JSON file in the process
//! working directory holding recent-repo LRU, terminal font settings, and
//! persisted-agent records. Diverges from the corpus's sqlite-backed
//! `db::queries` module by design -- see DESIGN.md -- because this is
//! whole-process, single-writer state small enough that a whole-file
//! rewrite is simpler and matches the spec's persistence model directly.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::agent::registry::{AgentPersistence, PersistedAgent};

const SETTINGS_FILE_NAME: &str = ".aiagent-local.json";
const MAX_RECENT_REPOS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminalSettings {
    pub font_family: String,
    pub font_size: u16,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            font_family: "Menlo, monospace".to_string(),
            font_size: 13,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct PersistedAgentRecord {
    id: String,
    name: String,
    source_repo: String,
    work_dir: String,
    branch: String,
    created_at: i64,
    scrollback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct SettingsFile {
    recent_repos: Vec<String>,
    terminal: TerminalSettings,
    agents: Vec<PersistedAgentRecord>,
}

pub struct SettingsStore {
    path: PathBuf,
    inner: Mutex<SettingsFile>,
}

impl SettingsStore {
    /// Loads `.aiagent-local.json` from `dir` if present; missing or
    /// unparsable files degrade to defaults (logged, not fatal).
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE_NAME);
        let file = Self::read_file(&path).unwrap_or_default();
        Self {
            path,
            inner: Mutex::new(file),
        }
    }

    fn read_file(path: &Path) -> Option<SettingsFile> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}, using defaults", path.display());
                None
            }
        }
    }

    /// Reload-modify-save: re-reads the file before mutating so a caller
    /// that only touches one field doesn't clobber concurrent writes to
    /// another (§4.8).
    fn with_reloaded<T>(&self, f: impl FnOnce(&mut SettingsFile) -> T) -> T {
        let mut guard = self.inner.lock().expect("settings mutex poisoned");
        if let Some(fresh) = Self::read_file(&self.path) {
            *guard = fresh;
        }
        let result = f(&mut guard);
        if let Err(e) = Self::write_file(&self.path, &guard) {
            tracing::warn!("failed to save {}: {e}", self.path.display());
        }
        result
    }

    fn write_file(path: &Path, file: &SettingsFile) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(file)?;
        std::fs::write(path, raw)
    }

    pub fn recent_repos(&self) -> Vec<String> {
        self.inner.lock().expect("settings mutex poisoned").recent_repos.clone()
    }

    /// Moves `repo` to the front, dedupes, and truncates to the LRU cap.
    pub fn push_recent_repo(&self, repo: String) {
        self.with_reloaded(|file| {
            file.recent_repos.retain(|r| r != &repo);
            file.recent_repos.insert(0, repo);
            file.recent_repos.truncate(MAX_RECENT_REPOS);
        });
    }

    pub fn terminal_settings(&self) -> TerminalSettings {
        self.inner.lock().expect("settings mutex poisoned").terminal.clone()
    }

    pub fn set_terminal_settings(&self, settings: TerminalSettings) {
        self.with_reloaded(|file| {
            file.terminal = settings;
        });
    }
}

impl AgentPersistence for SettingsStore {
    fn load_agents(&self) -> Vec<PersistedAgent> {
        self.inner
            .lock()
            .expect("settings mutex poisoned")
            .agents
            .iter()
            .map(|a| PersistedAgent {
                id: a.id.clone(),
                name: a.name.clone(),
                source_repo: a.source_repo.clone(),
                work_dir: a.work_dir.clone(),
                branch: a.branch.clone(),
                created_at: a.created_at,
                scrollback: a.scrollback.clone(),
            })
            .collect()
    }

    fn save_agent(&self, agent: &PersistedAgent) {
        self.with_reloaded(|file| {
            let record = PersistedAgentRecord {
                id: agent.id.clone(),
                name: agent.name.clone(),
                source_repo: agent.source_repo.clone(),
                work_dir: agent.work_dir.clone(),
                branch: agent.branch.clone(),
                created_at: agent.created_at,
                scrollback: agent.scrollback.clone(),
            };
            match file.agents.iter_mut().find(|a| a.id == agent.id) {
                Some(existing) => *existing = record,
                None => file.agents.push(record),
            }
        });
    }

    fn remove_agent(&self, agent_id: &str) {
        self.with_reloaded(|file| {
            file.agents.retain(|a| a.id != agent_id);
        });
    }
}
