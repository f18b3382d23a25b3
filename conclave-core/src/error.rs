//! Error types for Conclave

use thiserror::Error;

/// Result type alias for Conclave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Conclave operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread id is not known to the registry
    #[error("Unknown thread: {0}")]
    UnknownThread(String),

    /// Agent is not registered, or has disconnected
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// A thread was requested with no participants
    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    /// An agent with this id is already registered and live
    #[error("Agent already registered: {0}")]
    AgentExists(String),

    /// The thread was closed and no longer accepts messages
    #[error("Thread {0} is archived")]
    ThreadArchived(String),

    /// The agent tried to call a tool outside its capability set
    #[error("Agent {agent} may not invoke tool '{tool}'")]
    CapabilityDenied { agent: String, tool: String },

    /// Transient broker transport failure (connection reset, closed stream)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A tool call the workflow depends on failed
    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    /// Invalid workflow transition or malformed workflow input
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation may succeed
    ///
    /// Only transport failures are retried; broker errors are caller
    /// mistakes and surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
