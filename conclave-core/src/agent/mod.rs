//! Agent identities, roles and capability sets

mod types;

pub use types::{AgentId, AgentInfo, AgentRole, Liveness};
