//! Per-agent delivery queue

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use super::message::{Message, ThreadId};
use crate::agent::AgentId;

#[derive(Debug, Default)]
struct Inbox {
    queue: VecDeque<Message>,
    /// Highest seq enqueued per thread; a thread delivers in seq order
    last_seq: HashMap<ThreadId, u64>,
}

impl Inbox {
    /// Record a delivery; false when it is not newer than the last one
    fn admit(&mut self, message: &Message) -> bool {
        match self.last_seq.get_mut(&message.thread_id) {
            Some(last) if message.seq <= *last => false,
            Some(last) => {
                *last = message.seq;
                true
            }
            None => {
                self.last_seq.insert(message.thread_id.clone(), message.seq);
                true
            }
        }
    }
}

/// Private delivery queue of one agent
///
/// Taking a message happens synchronously under the lock, so dropping a
/// pending [`Mailbox::recv_timeout`] never loses a queued message.
#[derive(Debug)]
pub struct Mailbox {
    owner: AgentId,
    inbox: Mutex<Inbox>,
    notify: Notify,
}

impl Mailbox {
    pub(crate) fn new(owner: AgentId) -> Self {
        Self {
            owner,
            inbox: Mutex::new(Inbox::default()),
            notify: Notify::new(),
        }
    }

    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Enqueue a delivery; returns false for a duplicate or stale one
    pub(crate) fn push(&self, message: Message) -> bool {
        {
            let mut inbox = self.inbox();
            if !inbox.admit(&message) {
                return false;
            }
            inbox.queue.push_back(message);
        }
        self.notify.notify_one();
        true
    }

    /// Take the next delivery without waiting
    pub fn try_recv(&self) -> Option<Message> {
        self.inbox().queue.pop_front()
    }

    /// Wait up to `timeout` for the next delivery
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if let Some(message) = self.try_recv() {
                    return message;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Number of queued deliveries
    pub fn len(&self) -> usize {
        self.inbox().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::{MessageId, Payload};
    use chrono::Utc;

    fn message(seq: u64) -> Message {
        message_in("thread-1", seq)
    }

    fn message_in(thread: &str, seq: u64) -> Message {
        let thread = ThreadId::new(thread);
        Message {
            id: MessageId::new(&thread, seq),
            thread_id: thread,
            sender: "a".into(),
            mentions: vec!["b".into()],
            payload: Payload::text(format!("m{}", seq)),
            created_at: Utc::now(),
            seq,
        }
    }

    #[test]
    fn test_push_dedupes_by_id() {
        let mailbox = Mailbox::new("b".into());
        assert!(mailbox.push(message(1)));
        assert!(!mailbox.push(message(1)));
        assert_eq!(mailbox.len(), 1);

        // still deduplicated after it was consumed
        mailbox.try_recv().unwrap();
        assert!(!mailbox.push(message(1)));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_push_drops_older_seq_of_same_thread() {
        let mailbox = Mailbox::new("b".into());
        assert!(mailbox.push(message(3)));
        assert!(!mailbox.push(message(2)));
        assert!(mailbox.push(message_in("thread-2", 1)));
        assert!(mailbox.push(message(4)));

        let seqs: Vec<(String, u64)> = std::iter::from_fn(|| mailbox.try_recv())
            .map(|m| (m.thread_id.to_string(), m.seq))
            .collect();
        assert_eq!(
            seqs,
            vec![
                ("thread-1".to_string(), 3),
                ("thread-2".to_string(), 1),
                ("thread-1".to_string(), 4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_empty() {
        let mailbox = Mailbox::new("b".into());
        assert!(mailbox.recv_timeout(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let mailbox = std::sync::Arc::new(Mailbox::new("b".into()));
        let waiter = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.recv_timeout(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        mailbox.push(message(1));

        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.seq, 1);
    }
}
