//! Duplex message protocol (§4.6, §6): JSON text frames exchanged over the
//! `/ws` connection. Tags follow the corpus's externally-tagged enum
//! convention so the wire shape is `{"type": "attach", ...fields}`.

use serde::{Deserialize, Serialize};

use crate::agent::model::{Agent, Status, Tab};
use crate::agent::buffer::{BufferStats, OutputChunk};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Attach {
        agent_id: String,
        tab_id: Option<String>,
        from_seq: Option<i64>,
    },
    Detach,
    Input {
        data: String,
        tab_id: Option<String>,
    },
    Resize {
        cols: u16,
        rows: u16,
        tab_id: Option<String>,
    },
    Start {
        agent_id: String,
        tab_id: Option<String>,
    },
    Stop {
        agent_id: String,
        tab_id: Option<String>,
    },
    GainControl,
    CreateTab {
        agent_id: String,
        name: Option<String>,
    },
    CloseTab {
        agent_id: String,
        tab_id: String,
    },
    SyncOutput {
        agent_id: String,
        tab_id: String,
        from_seq: i64,
    },
    GetBufferStats {
        agent_id: String,
        tab_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Output {
        data: String,
        tab_id: String,
        seq: i64,
    },
    OutputSync {
        chunks: Vec<OutputChunk>,
        tab_id: String,
        last_seq: i64,
    },
    Attached {
        agent_id: String,
        tab_id: String,
        has_control: bool,
        last_seq: i64,
    },
    Detached,
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
    AgentsUpdated {
        agents: Vec<Agent>,
    },
    ControlChanged {
        has_control: bool,
    },
    BufferStats {
        stats: BufferStats,
    },
    Error {
        message: String,
    },
}
