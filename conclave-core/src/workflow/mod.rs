//! Per-role workflows driving agents through the broker
//!
//! Each role is a phase [`StateMachine`] plus the request handling of that
//! role. Roles exchange the typed payloads in [`requests`].

mod context;
pub mod requests;
mod runner;
pub mod roles;
mod state;

pub use context::AgentContext;
pub use requests::{FinalReport, TypedPayload};
pub use runner::{AgentRunner, RoleHandler};
pub use state::{StateMachine, Workflow};
