//! Transport-agnostic access to a broker
//!
//! Agents talk to the broker through [`BrokerTransport`], which may be the
//! in-process [`LocalTransport`] or a networked implementation. The
//! [`BrokerClient`] binds a transport to one agent identity and retries
//! transient transport failures with backoff, so workflows only see them if
//! recovery fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::hub::MessageBroker;
use super::message::{Message, Payload, ThreadId};
use crate::agent::{AgentId, AgentInfo};
use crate::config::TransportConfig;
use crate::wait::RetryPolicy;
use crate::Result;

/// Operations a broker transport must provide
///
/// Transient connectivity failures are reported as `Error::Transport`.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn register(&self, info: AgentInfo) -> Result<()>;

    async fn list_agents(&self) -> Result<Vec<AgentInfo>>;

    async fn create_thread(
        &self,
        name: &str,
        creator: &AgentId,
        participants: &[AgentId],
    ) -> Result<ThreadId>;

    async fn add_participant(&self, thread: &ThreadId, agent: &AgentId) -> Result<()>;

    async fn close_thread(&self, thread: &ThreadId) -> Result<()>;

    async fn post(
        &self,
        thread: &ThreadId,
        sender: &AgentId,
        mentions: &[AgentId],
        payload: Payload,
    ) -> Result<Message>;

    /// Start receiving deliveries for the agent
    async fn subscribe(&self, agent: &AgentId) -> Result<()>;

    /// Long-poll the agent's next delivery
    async fn next_delivery(&self, agent: &AgentId, timeout: Duration) -> Result<Option<Message>>;
}

/// Transport backed by an in-process [`MessageBroker`]
#[derive(Debug, Clone)]
pub struct LocalTransport {
    broker: Arc<MessageBroker>,
}

impl LocalTransport {
    pub fn new(broker: Arc<MessageBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }
}

#[async_trait]
impl BrokerTransport for LocalTransport {
    async fn register(&self, info: AgentInfo) -> Result<()> {
        self.broker.register_agent(info).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        Ok(self.broker.registry().list_agents().await)
    }

    async fn create_thread(
        &self,
        name: &str,
        creator: &AgentId,
        participants: &[AgentId],
    ) -> Result<ThreadId> {
        self.broker.create_thread(name, creator, participants).await
    }

    async fn add_participant(&self, thread: &ThreadId, agent: &AgentId) -> Result<()> {
        self.broker.registry().add_participant(thread, agent).await
    }

    async fn close_thread(&self, thread: &ThreadId) -> Result<()> {
        self.broker.registry().close_thread(thread).await
    }

    async fn post(
        &self,
        thread: &ThreadId,
        sender: &AgentId,
        mentions: &[AgentId],
        payload: Payload,
    ) -> Result<Message> {
        self.broker.post(thread, sender, mentions, payload).await
    }

    async fn subscribe(&self, agent: &AgentId) -> Result<()> {
        self.broker.subscribe(agent).await.map(|_| ())
    }

    async fn next_delivery(&self, agent: &AgentId, timeout: Duration) -> Result<Option<Message>> {
        let mailbox = self.broker.subscribe(agent).await?;
        Ok(mailbox.recv_timeout(timeout).await)
    }
}

/// A transport bound to one agent, retrying transient failures
#[derive(Clone)]
pub struct BrokerClient {
    transport: Arc<dyn BrokerTransport>,
    agent: AgentId,
    retry: RetryPolicy,
    max_retries: u32,
}

impl BrokerClient {
    pub fn new(transport: Arc<dyn BrokerTransport>, agent: impl Into<AgentId>) -> Self {
        Self::with_config(transport, agent, &TransportConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn BrokerTransport>,
        agent: impl Into<AgentId>,
        config: &TransportConfig,
    ) -> Self {
        Self {
            transport,
            agent: agent.into(),
            retry: config.retry_policy(),
            max_retries: config.max_retries,
        }
    }

    /// The agent this client acts for
    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        agent = %self.agent,
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient transport error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Register this client's agent
    pub async fn register(&self, info: AgentInfo) -> Result<()> {
        self.retrying("register", || self.transport.register(info.clone()))
            .await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        self.retrying("list_agents", || self.transport.list_agents())
            .await
    }

    /// Create a thread owned by this agent
    pub async fn create_thread(&self, name: &str, participants: &[AgentId]) -> Result<ThreadId> {
        self.retrying("create_thread", || {
            self.transport.create_thread(name, &self.agent, participants)
        })
        .await
    }

    pub async fn add_participant(&self, thread: &ThreadId, agent: &AgentId) -> Result<()> {
        self.retrying("add_participant", || {
            self.transport.add_participant(thread, agent)
        })
        .await
    }

    pub async fn close_thread(&self, thread: &ThreadId) -> Result<()> {
        self.retrying("close_thread", || self.transport.close_thread(thread))
            .await
    }

    /// Post as this agent
    pub async fn post(
        &self,
        thread: &ThreadId,
        mentions: &[AgentId],
        payload: Payload,
    ) -> Result<Message> {
        self.retrying("post", || {
            self.transport
                .post(thread, &self.agent, mentions, payload.clone())
        })
        .await
    }

    pub async fn subscribe(&self) -> Result<()> {
        self.retrying("subscribe", || self.transport.subscribe(&self.agent))
            .await
    }

    /// One long-poll for this agent's next delivery
    pub async fn next_delivery(&self, timeout: Duration) -> Result<Option<Message>> {
        self.retrying("next_delivery", || {
            self.transport.next_delivery(&self.agent, timeout)
        })
        .await
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("agent", &self.agent)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
