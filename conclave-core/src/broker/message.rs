//! Thread and message types exchanged through the broker

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::{Error, Result};

/// Thread identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier, unique across threads (`<thread>#<seq>`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(thread: &ThreadId, seq: u64) -> Self {
        Self(format!("{}#{}", thread, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured attachment: a kind tag, a one-line summary and JSON data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structured {
    pub kind: String,
    pub summary: String,
    pub data: serde_json::Value,
}

impl Structured {
    /// Serialize a typed value under the given kind
    pub fn encode<T: Serialize>(
        kind: impl Into<String>,
        summary: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        Ok(Self {
            kind: kind.into(),
            summary: summary.into(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Decode the data as `T`, checking the kind tag first
    pub fn decode<T: DeserializeOwned>(&self, expected_kind: &str) -> Result<T> {
        if self.kind != expected_kind {
            return Err(Error::Workflow(format!(
                "Expected '{}' payload, got '{}'",
                expected_kind, self.kind
            )));
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// Plain text
    Text(String),
    /// A typed work request for the mentioned agents
    Request(Structured),
    /// A structured tool or role result
    Result(Structured),
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Payload::Text(content.into())
    }

    /// Plain-text rendering of the payload
    pub fn content(&self) -> &str {
        match self {
            Payload::Text(text) => text,
            Payload::Request(s) | Payload::Result(s) => &s.summary,
        }
    }

    /// Kind tag of a structured payload
    pub fn kind(&self) -> Option<&str> {
        match self {
            Payload::Text(_) => None,
            Payload::Request(s) | Payload::Result(s) => Some(&s.kind),
        }
    }
}

/// An immutable message appended to a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender: AgentId,
    /// Explicit recipients; empty means broadcast to the thread
    pub mentions: Vec<AgentId>,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    /// Position within the thread, starting at 1
    pub seq: u64,
}

impl Message {
    /// Whether the message explicitly mentions the agent
    pub fn mentions(&self, agent: &AgentId) -> bool {
        self.mentions.contains(agent)
    }

    pub fn is_broadcast(&self) -> bool {
        self.mentions.is_empty()
    }
}
