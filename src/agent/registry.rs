//! Agent Registry (C4, §4.4): the map of agent id -> agent record and its
//! tabs, plus restart recovery and graceful-shutdown persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use uuid::Uuid;

use crate::agent::buffer::SequencedBuffer;
use crate::agent::control::ControlLock;
use crate::agent::model::{Agent, Status, Tab};
use crate::agent::tab_session::{resolve_shell_or_fallback, TabSession};
use crate::bus::{BusEvent, EventBus};
use crate::config::Config;

const SHUTDOWN_SCROLLBACK_CHARS: usize = 50_000;
const DEFAULT_TAB_NAME: &str = "Terminal";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("tab not found: {0}")]
    TabNotFound(String),
}

/// What the registry hands to the settings store to persist across restarts.
#[derive(Debug, Clone)]
pub struct PersistedAgent {
    pub id: String,
    pub name: String,
    pub source_repo: String,
    pub work_dir: String,
    pub branch: String,
    pub created_at: i64,
    pub scrollback: String,
}

/// Implemented by the settings store (§4.8); kept as a trait here so the
/// registry doesn't need to know about JSON-file persistence directly.
pub trait AgentPersistence: Send + Sync {
    fn load_agents(&self) -> Vec<PersistedAgent>;
    fn save_agent(&self, agent: &PersistedAgent);
    fn remove_agent(&self, agent_id: &str);
}

struct TabHandle {
    buffer: Arc<SequencedBuffer>,
    session: Arc<TabSession>,
}

struct AgentEntry {
    agent: Agent,
    tabs: HashMap<String, TabHandle>,
    tabs_created: usize,
}

pub struct AgentRegistry {
    bus: Arc<EventBus>,
    control: Arc<ControlLock>,
    shell_program: String,
    log_dir: Option<PathBuf>,
    persistence: Arc<dyn AgentPersistence>,
    agents: Mutex<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    pub fn new(
        config: &Config,
        bus: Arc<EventBus>,
        control: Arc<ControlLock>,
        persistence: Arc<dyn AgentPersistence>,
    ) -> Arc<Self> {
        let shell_program = resolve_shell_or_fallback(&Config::shell_program());
        let log_dir = if config.log_enabled {
            Some(
                config
                    .log_dir
                    .clone()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| Config::data_dir().join("logs")),
            )
        } else {
            None
        };

        Arc::new(Self {
            bus,
            control,
            shell_program,
            log_dir,
            persistence,
            agents: Mutex::new(HashMap::new()),
        })
    }

    /// Restore persisted agents whose `workDir` still exists, each with one
    /// idle tab seeded from its saved scrollback (§4.4).
    pub fn restore(self: &Arc<Self>) {
        for persisted in self.persistence.load_agents() {
            if !std::path::Path::new(&persisted.work_dir).exists() {
                tracing::warn!(
                    "dropping persisted agent {} (workDir {} no longer exists)",
                    persisted.id,
                    persisted.work_dir
                );
                self.persistence.remove_agent(&persisted.id);
                continue;
            }

            let agent = Agent {
                id: persisted.id.clone(),
                name: persisted.name.clone(),
                source_repo: persisted.source_repo.clone(),
                work_dir: persisted.work_dir.clone(),
                branch: persisted.branch.clone(),
                created_at: persisted.created_at,
                status: Status::Idle,
                tabs: Vec::new(),
            };

            let mut entry = AgentEntry {
                agent,
                tabs: HashMap::new(),
                tabs_created: 0,
            };

            let (tab, handle) = self.build_tab(&entry.agent.id, &entry.agent.name, DEFAULT_TAB_NAME, &persisted.work_dir);
            handle.buffer.seed(persisted.scrollback);
            entry.agent.tabs.push(tab);
            entry.tabs.insert(entry.agent.tabs[0].id.clone(), handle);
            entry.tabs_created = 1;

            let mut agents = self.agents.lock().expect("registry mutex poisoned");
            agents.insert(entry.agent.id.clone(), entry);
        }

        self.publish_agents_updated();
    }

    /// `id` is chosen by the caller (the HTTP layer) because the worktree
    /// directory is derived from it *before* the registry entry exists.
    pub fn create(self: &Arc<Self>, id: String, name: String, source_repo: String, work_dir: String, branch: String) -> Agent {
        let mut entry = AgentEntry {
            agent: Agent {
                id: id.clone(),
                name: name.clone(),
                source_repo,
                work_dir: work_dir.clone(),
                branch,
                created_at: chrono::Utc::now().timestamp_millis(),
                status: Status::Idle,
                tabs: Vec::new(),
            },
            tabs: HashMap::new(),
            tabs_created: 0,
        };

        let (tab, handle) = self.build_tab(&id, &name, DEFAULT_TAB_NAME, &work_dir);
        entry.agent.tabs.push(tab);
        entry.tabs.insert(entry.agent.tabs[0].id.clone(), handle);
        entry.tabs_created = 1;

        let agent = entry.agent.clone();
        self.agents
            .lock()
            .expect("registry mutex poisoned")
            .insert(id, entry);
        self.persist(&agent, "");
        self.publish_agents_updated();
        agent
    }

    pub fn delete(self: &Arc<Self>, agent_id: &str) -> Result<(), RegistryError> {
        let entry = self
            .agents
            .lock()
            .expect("registry mutex poisoned")
            .remove(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;

        for handle in entry.tabs.values() {
            handle.session.stop();
        }
        self.control.release_all(agent_id);
        self.persistence.remove_agent(agent_id);
        self.publish_agents_updated();
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents
            .lock()
            .expect("registry mutex poisoned")
            .get(agent_id)
            .map(|e| e.agent.clone())
    }

    pub fn list(&self) -> Vec<Agent> {
        self.agents
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .map(|e| e.agent.clone())
            .collect()
    }

    pub fn create_tab(self: &Arc<Self>, agent_id: &str, name: Option<String>) -> Result<Tab, RegistryError> {
        let (work_dir, agent_name, tab_name, tab_index) = {
            let agents = self.agents.lock().expect("registry mutex poisoned");
            let entry = agents
                .get(agent_id)
                .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
            let index = entry.tabs_created + 1;
            let tab_name = name.unwrap_or_else(|| format!("{DEFAULT_TAB_NAME} {index}"));
            (entry.agent.work_dir.clone(), entry.agent.name.clone(), tab_name, index)
        };

        let (tab, handle) = self.build_tab(agent_id, &agent_name, &tab_name, &work_dir);

        let mut agents = self.agents.lock().expect("registry mutex poisoned");
        let entry = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        entry.agent.tabs.push(tab.clone());
        entry.tabs.insert(tab.id.clone(), handle);
        entry.tabs_created = tab_index;
        drop(agents);

        self.bus.publish(BusEvent::TabCreated {
            agent_id: agent_id.to_string(),
            tab: tab.clone(),
        });
        self.publish_agents_updated();
        Ok(tab)
    }

    pub fn close_tab(self: &Arc<Self>, agent_id: &str, tab_id: &str) -> Result<(), RegistryError> {
        let mut agents = self.agents.lock().expect("registry mutex poisoned");
        let entry = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        let handle = entry
            .tabs
            .remove(tab_id)
            .ok_or_else(|| RegistryError::TabNotFound(tab_id.to_string()))?;
        entry.agent.tabs.retain(|t| t.id != tab_id);
        entry.agent.recompute_status();
        drop(agents);

        handle.session.stop();
        self.control.force_release(agent_id, tab_id);
        self.bus.publish(BusEvent::TabClosed {
            agent_id: agent_id.to_string(),
            tab_id: tab_id.to_string(),
        });
        self.publish_agents_updated();
        Ok(())
    }

    pub fn tab_session(&self, agent_id: &str, tab_id: &str) -> Option<Arc<TabSession>> {
        self.agents
            .lock()
            .expect("registry mutex poisoned")
            .get(agent_id)?
            .tabs
            .get(tab_id)
            .map(|h| Arc::clone(&h.session))
    }

    pub fn buffer(&self, agent_id: &str, tab_id: &str) -> Option<Arc<SequencedBuffer>> {
        self.agents
            .lock()
            .expect("registry mutex poisoned")
            .get(agent_id)?
            .tabs
            .get(tab_id)
            .map(|h| Arc::clone(&h.buffer))
    }

    fn build_tab(self: &Arc<Self>, agent_id: &str, agent_name: &str, tab_name: &str, work_dir: &str) -> (Tab, TabHandle) {
        let tab_id = Uuid::new_v4().to_string();
        let buffer = SequencedBuffer::new(agent_id.to_string(), tab_id.clone(), Arc::clone(&self.bus));

        let this = Arc::clone(self);
        let agent_id_owned = agent_id.to_string();
        let tab_id_owned = tab_id.clone();
        let on_status = Arc::new(move |status: Status| this.mark_tab_status(&agent_id_owned, &tab_id_owned, status));

        let session = TabSession::new(
            agent_id.to_string(),
            tab_id.clone(),
            agent_name.to_string(),
            tab_name.to_string(),
            PathBuf::from(work_dir),
            self.shell_program.clone(),
            self.log_dir.clone(),
            Arc::clone(&buffer),
            Arc::clone(&self.bus),
            on_status,
        );

        let tab = Tab {
            id: tab_id,
            name: tab_name.to_string(),
            status: Status::Idle,
        };
        (tab, TabHandle { buffer, session })
    }

    /// Invoked from a tab session's status callback: updates the tab's
    /// recorded status, recomputes the owning agent's aggregate status, and
    /// publishes both (§4.4 status roll-up).
    fn mark_tab_status(self: &Arc<Self>, agent_id: &str, tab_id: &str, status: Status) {
        let agent_status = {
            let mut agents = self.agents.lock().expect("registry mutex poisoned");
            let Some(entry) = agents.get_mut(agent_id) else {
                return;
            };
            if let Some(tab) = entry.agent.tabs.iter_mut().find(|t| t.id == tab_id) {
                tab.status = status;
            }
            entry.agent.recompute_status();
            entry.agent.status
        };

        self.bus.publish(BusEvent::AgentStatus {
            agent_id: agent_id.to_string(),
            status: agent_status,
        });
        self.publish_agents_updated();
    }

    fn persist(&self, agent: &Agent, scrollback: &str) {
        self.persistence.save_agent(&PersistedAgent {
            id: agent.id.clone(),
            name: agent.name.clone(),
            source_repo: agent.source_repo.clone(),
            work_dir: agent.work_dir.clone(),
            branch: agent.branch.clone(),
            created_at: agent.created_at,
            scrollback: scrollback.to_string(),
        });
    }

    fn publish_agents_updated(&self) {
        self.bus.publish(BusEvent::AgentsUpdated { agents: self.list() });
    }

    /// Graceful-shutdown persistence (§4.4, §8): flush every tab's pending
    /// bytes (so the shutdown-drain invariant's `pendingData` empty clause
    /// holds across all tabs, not just the persisted one), then persist the
    /// last 50 000 characters of reconstructed scrollback for each agent's
    /// first tab.
    pub fn persist_all_on_shutdown(&self) {
        let agents = self.agents.lock().expect("registry mutex poisoned");
        for entry in agents.values() {
            for handle in entry.tabs.values() {
                handle.buffer.flush();
            }

            let Some(first_tab_id) = entry.agent.first_tab_id() else {
                continue;
            };
            let Some(handle) = entry.tabs.get(first_tab_id) else {
                continue;
            };
            let scrollback = handle.buffer.tail(SHUTDOWN_SCROLLBACK_CHARS);
            self.persist(&entry.agent, &scrollback);
        }
    }
}
