//! Conclave Core - cooperating agents over a threaded message broker
//!
//! Agents register with a [`broker::MessageBroker`], talk in threads by
//! mentioning each other, call external capabilities through the
//! [`tools::ToolGateway`] and keep bounded context in
//! [`memory::HeadSummaryMemory`]. The [`workflow`] module holds the role
//! state machines that tie these together.

pub mod agent;
pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod secrets;
pub mod tools;
pub mod wait;
pub mod workflow;

pub use config::Config;
pub use error::{Error, Result};
