//! In-process message broker
//!
//! Routes posted messages to the mailboxes of the mentioned agents, or of all
//! other participants when nobody is mentioned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::mailbox::Mailbox;
use super::message::{Message, MessageId, Payload, ThreadId};
use super::registry::ThreadRegistry;
use crate::agent::{AgentId, AgentInfo, Liveness};
use crate::{Error, Result};

/// Pub/sub hub shared by all agents of a deployment
#[derive(Debug, Default)]
pub struct MessageBroker {
    registry: ThreadRegistry,
    mailboxes: RwLock<HashMap<AgentId, Arc<Mailbox>>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying thread registry
    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub async fn register_agent(&self, info: AgentInfo) -> Result<()> {
        self.registry.register_agent(info).await
    }

    pub async fn create_thread(
        &self,
        name: impl Into<String>,
        creator: &AgentId,
        participants: &[AgentId],
    ) -> Result<ThreadId> {
        self.registry.create_thread(name, creator, participants).await
    }

    /// Obtain the agent's delivery queue
    ///
    /// Repeated calls return the same queue, so nothing still queued is lost.
    /// Messages posted before the first call are never delivered.
    pub async fn subscribe(&self, agent: &AgentId) -> Result<Arc<Mailbox>> {
        self.registry.ensure_live([agent]).await?;

        let mut mailboxes = self.mailboxes.write().await;
        if let Some(mailbox) = mailboxes.get(agent) {
            return Ok(mailbox.clone());
        }

        let mailbox = Arc::new(Mailbox::new(agent.clone()));
        mailboxes.insert(agent.clone(), mailbox.clone());
        drop(mailboxes);

        self.registry.set_liveness(agent, Liveness::Active).await?;
        info!(agent = %agent, "Agent subscribed");
        Ok(mailbox)
    }

    /// Disconnect an agent and drop its undelivered messages
    pub async fn disconnect(&self, agent: &AgentId) -> Result<()> {
        self.registry
            .set_liveness(agent, Liveness::Disconnected)
            .await?;
        self.mailboxes.write().await.remove(agent);
        info!(agent = %agent, "Agent disconnected");
        Ok(())
    }

    /// Append a message to a thread and enqueue its deliveries
    pub async fn post(
        &self,
        thread_id: &ThreadId,
        sender: &AgentId,
        mentions: &[AgentId],
        payload: Payload,
    ) -> Result<Message> {
        self.registry
            .ensure_live(std::iter::once(sender).chain(mentions))
            .await?;
        let thread = self.registry.thread(thread_id).await?;

        // Deliveries are enqueued while the thread lock is held so every
        // recipient sees this thread's messages in sequence order.
        let mut thread = thread.lock().await;
        if thread.archived {
            return Err(Error::ThreadArchived(thread_id.to_string()));
        }

        let seq = thread.take_seq();
        let mut unique_mentions: Vec<AgentId> = Vec::with_capacity(mentions.len());
        for agent in mentions {
            if !unique_mentions.contains(agent) {
                unique_mentions.push(agent.clone());
            }
        }

        let message = Message {
            id: MessageId::new(thread_id, seq),
            thread_id: thread_id.clone(),
            sender: sender.clone(),
            mentions: unique_mentions,
            payload,
            created_at: Utc::now(),
            seq,
        };
        thread.messages.push(message.clone());

        let recipients: Vec<AgentId> = if message.is_broadcast() {
            thread
                .participants
                .iter()
                .filter(|p| *p != sender)
                .cloned()
                .collect()
        } else {
            message.mentions.clone()
        };

        let mailboxes = self.mailboxes.read().await;
        let mut delivered = 0;
        for recipient in &recipients {
            match mailboxes.get(recipient) {
                Some(mailbox) => {
                    if mailbox.push(message.clone()) {
                        delivered += 1;
                    }
                }
                None => debug!(agent = %recipient, "Recipient not subscribed, skipping delivery"),
            }
        }

        info!(
            thread = %thread_id,
            seq,
            sender = %sender,
            kind = message.payload.kind().unwrap_or("text"),
            delivered,
            "Posted message"
        );
        Ok(message)
    }

    /// Redeliver a message after a transport hiccup
    ///
    /// Returns false when the agent already received it.
    pub async fn redeliver(&self, agent: &AgentId, message: &Message) -> Result<bool> {
        let mailbox = self
            .mailboxes
            .read()
            .await
            .get(agent)
            .cloned()
            .ok_or_else(|| Error::UnknownAgent(agent.to_string()))?;
        Ok(mailbox.push(message.clone()))
    }

    /// Messages of a thread in sequence order
    pub async fn history(&self, thread: &ThreadId) -> Result<Vec<Message>> {
        self.registry.history(thread).await
    }
}
