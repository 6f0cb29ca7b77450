//! Agent domain: the in-memory model, per-tab PTY sessions, the sequenced
//! output buffer, the control-owner lock, and the registry that ties them
//! together (§4.1-§4.5 minus the worktree coordinator, which lives in
//! [`crate::worktree`]).

pub mod buffer;
pub mod control;
pub mod model;
pub mod registry;
pub mod tab_session;

pub use model::{Agent, Status, Tab};
pub use registry::{AgentRegistry, RegistryError};
