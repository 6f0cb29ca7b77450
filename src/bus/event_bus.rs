use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent::buffer::OutputChunk;
use crate::agent::model::{Agent, Status, Tab};

const BUS_CAPACITY: usize = 1024;

/// Topic-tagged events published by every subsystem and consumed by every
/// subscriber task. Subscribers filter by the fields relevant to their
/// attached (agent, tab); delivery to a closed subscriber is a no-op because
/// a lagging/dropped broadcast receiver simply stops polling.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum BusEvent {
    Chunk {
        agent_id: String,
        tab_id: String,
        chunk: OutputChunk,
    },
    AgentsUpdated {
        agents: Vec<Agent>,
    },
    AgentStatus {
        agent_id: String,
        status: Status,
    },
    TabStatus {
        agent_id: String,
        tab_id: String,
        status: Status,
    },
    TabCreated {
        agent_id: String,
        tab: Tab,
    },
    TabClosed {
        agent_id: String,
        tab_id: String,
    },
    ControlChanged {
        agent_id: String,
        tab_id: String,
        new_owner: Option<String>,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish never blocks; with no receivers this is simply a no-op send
    /// error that we log at debug level rather than propagate.
    pub fn publish(&self, event: BusEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event bus publish had no receivers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}
