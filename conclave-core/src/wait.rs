//! Waiting for mentions with timeout and bounded retry
//!
//! A wait is a series of attempts. Each attempt blocks up to a timeout for
//! the next delivery; an empty attempt is [`Attempt::NoNewMessages`]. After
//! the last empty attempt the waiter reports [`WaitOutcome::Timeout`], which
//! workflows treat as "collaborator did not respond" rather than an error.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{BrokerClient, Message, ThreadId};
use crate::config::WaitConfig;
use crate::Result;

/// Delay schedule between retries: fixed, or exponential with a cap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    delay: Duration,
    backoff: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed delay between attempts
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            backoff: 1.0,
            max_delay: delay,
        }
    }

    /// No delay at all
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Multiply the delay by `factor` after each attempt
    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff = factor.max(1.0);
        if self.backoff > 1.0 && self.max_delay <= self.delay {
            self.max_delay = self.delay.saturating_mul(32);
        }
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Delay after the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(attempt.min(30) as i32);
        self.delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        WaitConfig::default().retry_policy()
    }
}

/// Result of a single wait attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Message(Message),
    NoNewMessages,
}

/// Result of a full wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Message(Message),
    /// Every attempt came back empty
    Timeout { attempts: u32 },
    /// The caller cancelled the wait
    Cancelled { attempts: u32 },
}

impl WaitOutcome {
    pub fn message(self) -> Option<Message> {
        match self {
            WaitOutcome::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitOutcome::Timeout { .. })
    }
}

/// Blocking mention waits for one agent
#[derive(Debug)]
pub struct MentionWaiter {
    client: BrokerClient,
    retry: RetryPolicy,
    /// Highest seq returned per thread
    last_seq: HashMap<ThreadId, u64>,
}

impl MentionWaiter {
    pub fn new(client: BrokerClient, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            last_seq: HashMap::new(),
        }
    }

    /// Whether the message is newer than anything returned from its thread
    fn is_new(&mut self, message: &Message) -> bool {
        let last = self.last_seq.entry(message.thread_id.clone()).or_insert(0);
        if message.seq <= *last {
            return false;
        }
        *last = message.seq;
        true
    }

    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    /// One attempt: block up to `timeout` for the next new delivery
    ///
    /// Redelivered messages this waiter already returned are skipped.
    /// Dropping the future mid-attempt loses nothing.
    pub async fn attempt(&mut self, timeout: Duration) -> Result<Attempt> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.client.next_delivery(remaining).await? {
                Some(message) if self.is_new(&message) => {
                    return Ok(Attempt::Message(message));
                }
                Some(message) => {
                    debug!(agent = %self.client.agent(), id = %message.id, "Dropping duplicate delivery");
                }
                None => return Ok(Attempt::NoNewMessages),
            }
            if remaining.is_zero() {
                return Ok(Attempt::NoNewMessages);
            }
        }
    }

    /// Wait for a mention, retrying up to `max_attempts` times
    pub async fn wait_for_mention(
        &mut self,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<WaitOutcome> {
        self.wait_until_cancelled(timeout, max_attempts, &CancellationToken::new())
            .await
    }

    /// Like [`MentionWaiter::wait_for_mention`], giving up once `cancel` fires
    ///
    /// Cancellation interrupts a running attempt or retry delay; a message
    /// still queued at that point stays queued.
    pub async fn wait_until_cancelled(
        &mut self,
        timeout: Duration,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let max_attempts = max_attempts.max(1);
        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                info!(agent = %self.client.agent(), attempts = attempt, "Wait cancelled");
                return Ok(WaitOutcome::Cancelled { attempts: attempt });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.attempt(timeout) => Some(result?),
            };
            let Some(result) = result else {
                info!(agent = %self.client.agent(), attempts = attempt, "Wait cancelled mid-attempt");
                return Ok(WaitOutcome::Cancelled { attempts: attempt });
            };

            match result {
                Attempt::Message(message) => {
                    debug!(
                        agent = %self.client.agent(),
                        thread = %message.thread_id,
                        seq = message.seq,
                        attempt = attempt + 1,
                        "Received mention"
                    );
                    return Ok(WaitOutcome::Message(message));
                }
                Attempt::NoNewMessages => {
                    debug!(agent = %self.client.agent(), attempt = attempt + 1, max_attempts, "No new messages");
                }
            }

            if attempt + 1 < max_attempts {
                let delay = self.retry.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(agent = %self.client.agent(), attempts = max_attempts, "Wait timed out");
        Ok(WaitOutcome::Timeout {
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInfo, AgentRole};
    use crate::broker::{FlakyTransport, LocalTransport, MessageBroker, Payload, ThreadId};
    use crate::config::TransportConfig;
    use std::sync::Arc;

    async fn setup() -> (Arc<MessageBroker>, MentionWaiter, ThreadId) {
        let broker = Arc::new(MessageBroker::new());
        for id in ["a", "b"] {
            broker
                .register_agent(AgentInfo::new(id, AgentRole::Interface))
                .await
                .unwrap();
        }
        let thread = broker.create_thread("t", &"a".into(), &["b".into()]).await.unwrap();
        let client = BrokerClient::new(Arc::new(LocalTransport::new(broker.clone())), "b");
        client.subscribe().await.unwrap();
        (broker, MentionWaiter::new(client, RetryPolicy::immediate()), thread)
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::new(Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(2));
    }

    #[test]
    fn test_retry_policy_backoff_capped() {
        let policy = RetryPolicy::new(Duration::from_millis(100))
            .with_backoff(2.0)
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_all_attempts() {
        let (_broker, mut waiter, _thread) = setup().await;
        let start = tokio::time::Instant::now();

        let outcome = waiter
            .wait_for_mention(Duration::from_secs(1), 3)
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::Timeout { attempts: 3 });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_arriving_mid_wait() {
        let (broker, mut waiter, thread) = setup().await;

        let poster = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            broker
                .post(&thread, &"a".into(), &["b".into()], Payload::text("late"))
                .await
                .unwrap();
        });

        let outcome = waiter
            .wait_for_mention(Duration::from_secs(1), 3)
            .await
            .unwrap();
        poster.await.unwrap();
        assert_eq!(outcome.message().unwrap().payload.content(), "late");
    }

    #[tokio::test]
    async fn test_returns_queued_message() {
        let (broker, mut waiter, thread) = setup().await;
        broker
            .post(&thread, &"a".into(), &["b".into()], Payload::text("queued"))
            .await
            .unwrap();

        let outcome = waiter
            .wait_for_mention(Duration::from_millis(10), 1)
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Message(_)));
    }

    #[tokio::test]
    async fn test_cancel_keeps_message_queued() {
        let (broker, mut waiter, thread) = setup().await;
        broker
            .post(&thread, &"a".into(), &["b".into()], Payload::text("keep me"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = waiter
            .wait_until_cancelled(Duration::from_millis(10), 5, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled { attempts: 0 });

        let outcome = waiter
            .wait_for_mention(Duration::from_millis(10), 1)
            .await
            .unwrap();
        assert_eq!(outcome.message().unwrap().payload.content(), "keep me");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_attempt() {
        let (_broker, mut waiter, _thread) = setup().await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let outcome = waiter
            .wait_until_cancelled(Duration::from_secs(8), 10, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Cancelled { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_redelivered_older_seq_is_dropped() {
        let (broker, mut waiter, thread) = setup().await;
        let first = broker
            .post(&thread, &"a".into(), &["b".into()], Payload::text("one"))
            .await
            .unwrap();
        broker
            .post(&thread, &"a".into(), &["b".into()], Payload::text("two"))
            .await
            .unwrap();

        let mut returned = Vec::new();
        for _ in 0..2 {
            if let Attempt::Message(m) = waiter.attempt(Duration::from_millis(10)).await.unwrap() {
                returned.push(m.seq);
            }
        }
        assert_eq!(returned, vec![1, 2]);

        // a stale copy slips past the mailbox, e.g. after a reconnect
        assert!(!waiter.is_new(&first));
        assert_eq!(
            waiter.attempt(Duration::from_millis(10)).await.unwrap(),
            Attempt::NoNewMessages
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_invisible_within_attempt() {
        let broker = Arc::new(MessageBroker::new());
        for id in ["a", "b"] {
            broker
                .register_agent(AgentInfo::new(id, AgentRole::Interface))
                .await
                .unwrap();
        }
        let thread = broker.create_thread("t", &"a".into(), &["b".into()]).await.unwrap();
        let transport = Arc::new(FlakyTransport::new(broker.clone(), 1));
        let config = TransportConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
            ..TransportConfig::default()
        };
        let client = BrokerClient::with_config(transport, "b", &config);
        client.subscribe().await.unwrap();
        broker
            .post(&thread, &"a".into(), &["b".into()], Payload::text("through"))
            .await
            .unwrap();

        let mut waiter = MentionWaiter::new(client, RetryPolicy::immediate());
        let outcome = waiter
            .wait_for_mention(Duration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(outcome.message().unwrap().payload.content(), "through");
    }
}
