//! Agent and tab data model (§3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Running,
    Stopped,
}

/// Reduce a set of tab statuses into the owning agent's status: running if
/// any tab is running, else stopped if any tab is stopped, else idle.
pub fn reduce_agent_status(tab_statuses: impl IntoIterator<Item = Status>) -> Status {
    let mut saw_stopped = false;
    let mut saw_any = false;
    for status in tab_statuses {
        saw_any = true;
        match status {
            Status::Running => return Status::Running,
            Status::Stopped => saw_stopped = true,
            Status::Idle => {}
        }
    }
    if !saw_any {
        Status::Idle
    } else if saw_stopped {
        Status::Stopped
    } else {
        Status::Idle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub name: String,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub source_repo: String,
    pub work_dir: String,
    pub branch: String,
    pub created_at: i64,
    pub status: Status,
    pub tabs: Vec<Tab>,
}

impl Agent {
    pub fn first_tab_id(&self) -> Option<&str> {
        self.tabs.first().map(|t| t.id.as_str())
    }

    pub fn recompute_status(&mut self) {
        self.status = reduce_agent_status(self.tabs.iter().map(|t| t.status));
    }
}
