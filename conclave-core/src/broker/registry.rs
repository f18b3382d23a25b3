//! Registry of agents and conversation threads
//!
//! The registry exclusively owns threads and their messages. Each thread sits
//! behind its own mutex so that sequence numbers are assigned by a single
//! writer per thread while unrelated threads proceed in parallel.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::message::{Message, ThreadId};
use crate::agent::{AgentId, AgentInfo, Liveness};
use crate::{Error, Result};

/// An append-only conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub creator: AgentId,
    pub participants: BTreeSet<AgentId>,
    pub messages: Vec<Message>,
    pub archived: bool,
    next_seq: u64,
}

impl Thread {
    fn new(id: ThreadId, name: String, creator: AgentId, participants: BTreeSet<AgentId>) -> Self {
        Self {
            id,
            name,
            creator,
            participants,
            messages: Vec::new(),
            archived: false,
            next_seq: 1,
        }
    }

    /// Reserve the next sequence number
    pub(crate) fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Sequence number of the newest message, 0 if empty
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

/// Agents and threads known to a broker
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    agents: RwLock<HashMap<AgentId, AgentInfo>>,
    threads: RwLock<HashMap<ThreadId, Arc<Mutex<Thread>>>>,
    next_thread: AtomicU64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent
    ///
    /// A disconnected agent may register again under the same id.
    pub async fn register_agent(&self, info: AgentInfo) -> Result<()> {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(&info.id) {
            if existing.is_live() {
                return Err(Error::AgentExists(info.id.to_string()));
            }
        }

        info!(agent = %info.id, role = %info.role, "Registered agent");
        agents.insert(
            info.id.clone(),
            AgentInfo {
                liveness: Liveness::Registered,
                ..info
            },
        );
        Ok(())
    }

    /// All registered agents, sorted by id
    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Look up a live agent
    pub async fn agent(&self, id: &AgentId) -> Result<AgentInfo> {
        self.agents
            .read()
            .await
            .get(id)
            .filter(|a| a.is_live())
            .cloned()
            .ok_or_else(|| Error::UnknownAgent(id.to_string()))
    }

    pub(crate) async fn set_liveness(&self, id: &AgentId, liveness: Liveness) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .filter(|a| a.is_live())
            .ok_or_else(|| Error::UnknownAgent(id.to_string()))?;
        debug!(agent = %id, from = ?agent.liveness, to = ?liveness, "Agent liveness change");
        agent.liveness = liveness;
        Ok(())
    }

    /// Fail with `UnknownAgent` for the first id that is not live
    pub async fn ensure_live<'a>(&self, ids: impl IntoIterator<Item = &'a AgentId>) -> Result<()> {
        let agents = self.agents.read().await;
        for id in ids {
            if !agents.get(id).is_some_and(|a| a.is_live()) {
                return Err(Error::UnknownAgent(id.to_string()));
            }
        }
        Ok(())
    }

    /// Create a thread with the given participants
    ///
    /// The creator is always a participant.
    pub async fn create_thread(
        &self,
        name: impl Into<String>,
        creator: &AgentId,
        participants: &[AgentId],
    ) -> Result<ThreadId> {
        if participants.is_empty() {
            return Err(Error::InvalidParticipants(
                "a thread needs at least one participant".to_string(),
            ));
        }
        self.ensure_live(std::iter::once(creator).chain(participants))
            .await?;

        let n = self.next_thread.fetch_add(1, Ordering::Relaxed) + 1;
        let id = ThreadId::new(format!("thread-{}", n));
        let mut members: BTreeSet<AgentId> = participants.iter().cloned().collect();
        members.insert(creator.clone());

        let name = name.into();
        info!(thread = %id, name = %name, participants = members.len(), "Created thread");
        let thread = Thread::new(id.clone(), name, creator.clone(), members);
        self.threads
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(thread)));
        Ok(id)
    }

    pub(crate) async fn thread(&self, id: &ThreadId) -> Result<Arc<Mutex<Thread>>> {
        self.threads
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownThread(id.to_string()))
    }

    /// Add a participant to an open thread
    pub async fn add_participant(&self, thread: &ThreadId, agent: &AgentId) -> Result<()> {
        self.ensure_live([agent]).await?;
        let thread = self.thread(thread).await?;
        let mut thread = thread.lock().await;
        if thread.archived {
            return Err(Error::ThreadArchived(thread.id.to_string()));
        }
        thread.participants.insert(agent.clone());
        Ok(())
    }

    /// Remove a participant; returns whether it was a member
    pub async fn remove_participant(&self, thread: &ThreadId, agent: &AgentId) -> Result<bool> {
        let thread = self.thread(thread).await?;
        let removed = thread.lock().await.participants.remove(agent);
        Ok(removed)
    }

    /// Archive a thread; its history stays readable
    pub async fn close_thread(&self, thread: &ThreadId) -> Result<()> {
        let thread = self.thread(thread).await?;
        let mut thread = thread.lock().await;
        if !thread.archived {
            info!(thread = %thread.id, messages = thread.messages.len(), "Archived thread");
            thread.archived = true;
        }
        Ok(())
    }

    /// Copy of a thread including its messages
    pub async fn snapshot(&self, thread: &ThreadId) -> Result<Thread> {
        let thread = self.thread(thread).await?;
        let copy = thread.lock().await.clone();
        Ok(copy)
    }

    /// Messages of a thread in sequence order
    pub async fn history(&self, thread: &ThreadId) -> Result<Vec<Message>> {
        Ok(self.snapshot(thread).await?.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;

    async fn registry_with(ids: &[&str]) -> ThreadRegistry {
        let registry = ThreadRegistry::new();
        for id in ids {
            registry
                .register_agent(AgentInfo::new(*id, AgentRole::DiffReviewer))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let registry = registry_with(&["a"]).await;
        let err = registry
            .register_agent(AgentInfo::new("a", AgentRole::TestRunner))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentExists(_)));
    }

    #[tokio::test]
    async fn test_reregister_after_disconnect() {
        let registry = registry_with(&["a"]).await;
        registry
            .set_liveness(&"a".into(), Liveness::Disconnected)
            .await
            .unwrap();
        assert!(registry.agent(&"a".into()).await.is_err());

        registry
            .register_agent(AgentInfo::new("a", AgentRole::TestRunner))
            .await
            .unwrap();
        let agent = registry.agent(&"a".into()).await.unwrap();
        assert_eq!(agent.role, AgentRole::TestRunner);
        assert_eq!(agent.liveness, Liveness::Registered);
    }

    #[tokio::test]
    async fn test_create_thread_requires_participants() {
        let registry = registry_with(&["a"]).await;
        let err = registry
            .create_thread("empty", &"a".into(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParticipants(_)));
    }

    #[tokio::test]
    async fn test_create_thread_unknown_participant() {
        let registry = registry_with(&["a"]).await;
        let err = registry
            .create_thread("t", &"a".into(), &["ghost".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAgent(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_thread_ids_are_unique() {
        let registry = registry_with(&["a", "b"]).await;
        let t1 = registry.create_thread("one", &"a".into(), &["b".into()]).await.unwrap();
        let t2 = registry.create_thread("two", &"a".into(), &["b".into()]).await.unwrap();
        assert_ne!(t1, t2);

        let thread = registry.snapshot(&t1).await.unwrap();
        assert!(thread.participants.contains(&AgentId::from("a")));
        assert_eq!(thread.last_seq(), 0);
    }

    #[tokio::test]
    async fn test_participants_and_archive() {
        let registry = registry_with(&["a", "b", "c"]).await;
        let t = registry.create_thread("t", &"a".into(), &["b".into()]).await.unwrap();

        registry.add_participant(&t, &"c".into()).await.unwrap();
        assert!(registry.remove_participant(&t, &"b".into()).await.unwrap());
        assert!(!registry.remove_participant(&t, &"b".into()).await.unwrap());

        registry.close_thread(&t).await.unwrap();
        let err = registry.add_participant(&t, &"b".into()).await.unwrap_err();
        assert!(matches!(err, Error::ThreadArchived(_)));
        assert!(registry.snapshot(&t).await.unwrap().archived);
    }

    #[tokio::test]
    async fn test_unknown_thread() {
        let registry = registry_with(&["a"]).await;
        let err = registry.history(&ThreadId::new("nope")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownThread(_)));
    }
}
