//! Everything a role needs to act: identity, broker, waiter, tools, config

use std::collections::VecDeque;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::{AgentId, AgentInfo};
use crate::broker::{BrokerClient, BrokerTransport, Message, Payload, ThreadId};
use crate::config::Config;
use crate::tools::{ToolError, ToolGateway, ToolOutcome, ToolResult};
use crate::wait::{Attempt, MentionWaiter, WaitOutcome};
use crate::{Error, Result};

/// A connected agent
///
/// Messages that arrive while the agent waits for a specific reply are
/// kept aside and handed out first by [`AgentContext::next_message`].
#[derive(Debug)]
pub struct AgentContext {
    info: AgentInfo,
    client: BrokerClient,
    waiter: MentionWaiter,
    gateway: Arc<ToolGateway>,
    config: Config,
    stash: VecDeque<Message>,
}

impl AgentContext {
    /// Register the agent with the broker and the gateway, then subscribe
    pub async fn connect(
        info: AgentInfo,
        transport: Arc<dyn BrokerTransport>,
        gateway: Arc<ToolGateway>,
        config: Config,
    ) -> Result<Self> {
        let client = BrokerClient::with_config(transport, info.id.clone(), &config.transport);
        client.register(info.clone()).await?;
        client.subscribe().await?;
        gateway.register_agent(&info).await;

        let waiter = MentionWaiter::new(client.clone(), config.wait.retry_policy());
        debug!(agent = %info.id, role = %info.role, "Agent connected");
        Ok(Self {
            info,
            client,
            waiter,
            gateway,
            config,
            stash: VecDeque::new(),
        })
    }

    /// Register and subscribe again after the transport dropped
    ///
    /// A registration the broker still holds as live is kept.
    pub async fn reconnect(&self) -> Result<()> {
        match self.client.register(self.info.clone()).await {
            Ok(()) | Err(Error::AgentExists(_)) => {}
            Err(e) => return Err(e),
        }
        self.client.subscribe().await?;
        info!(agent = %self.info.id, "Agent reconnected");
        Ok(())
    }

    pub fn id(&self) -> &AgentId {
        &self.info.id
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Invoke a tool and decode its result
    ///
    /// The outer `Result` carries caller mistakes such as a denied
    /// capability; the inner one is the tool's own outcome.
    pub async fn call<P, T>(&self, tool: &str, params: &P) -> Result<ToolResult<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let outcome = self.gateway.invoke(self.id(), tool, params).await?;
        Ok(match outcome {
            ToolOutcome::Success(value) => serde_json::from_value(value).map_err(|e| {
                ToolError::execution(format!("unexpected result from {}: {}", tool, e))
            }),
            ToolOutcome::Failed(err) => Err(err),
        })
    }

    /// Next message for this agent, using the configured wait settings
    pub async fn next_message(&mut self, cancel: &CancellationToken) -> Result<WaitOutcome> {
        if let Some(message) = self.stash.pop_front() {
            return Ok(WaitOutcome::Message(message));
        }
        let wait = &self.config.wait;
        self.waiter
            .wait_until_cancelled(wait.timeout, wait.max_attempts, cancel)
            .await
    }

    /// Wait for a message from `from` in `thread`
    ///
    /// Only empty attempts count against `max_attempts`; unrelated messages
    /// are stashed for later. Returns `None` once the attempts run out.
    pub async fn await_reply(
        &mut self,
        thread: &ThreadId,
        from: &AgentId,
        max_attempts: u32,
    ) -> Result<Option<Message>> {
        if let Some(pos) = self
            .stash
            .iter()
            .position(|m| &m.thread_id == thread && &m.sender == from)
        {
            return Ok(self.stash.remove(pos));
        }

        let timeout = self.config.wait.timeout;
        let retry = self.config.wait.retry_policy();
        let max_attempts = max_attempts.max(1);
        let mut empty = 0;
        while empty < max_attempts {
            match self.waiter.attempt(timeout).await? {
                Attempt::Message(message)
                    if &message.thread_id == thread && &message.sender == from =>
                {
                    return Ok(Some(message));
                }
                Attempt::Message(message) => {
                    debug!(
                        agent = %self.id(),
                        thread = %message.thread_id,
                        sender = %message.sender,
                        "Stashing unrelated message"
                    );
                    self.stash.push_back(message);
                }
                Attempt::NoNewMessages => {
                    debug!(agent = %self.id(), waiting_for = %from, attempt = empty + 1, "No reply yet");
                    empty += 1;
                    if empty < max_attempts {
                        tokio::time::sleep(retry.delay_for(empty - 1)).await;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Post to a thread as this agent
    pub async fn post(
        &self,
        thread: &ThreadId,
        mentions: &[AgentId],
        payload: Payload,
    ) -> Result<Message> {
        self.client.post(thread, mentions, payload).await
    }

    /// Answer a message, mentioning its sender
    pub async fn reply(&self, to: &Message, payload: Payload) -> Result<Message> {
        self.client
            .post(&to.thread_id, std::slice::from_ref(&to.sender), payload)
            .await
    }
}
