//! In-memory thread store: named, participant-scoped, append-only message
//! logs. Appends are serialized under a per-thread lock, so per-thread order
//! is strict; nothing is guaranteed across threads.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::OpError;
use crate::mentions::mention_union;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub body: String,
    pub mentions: Vec<String>,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ThreadCell {
    thread_id: String,
    state: Mutex<ThreadState>,
}

#[derive(Debug)]
struct ThreadState {
    name: String,
    created_by: String,
    participants: HashSet<String>,
    closed: bool,
    log: Vec<Message>,
}

/// A read-only snapshot of one thread, for listings and tests.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub name: String,
    pub created_by: String,
    pub participants: Vec<String>,
    pub closed: bool,
    pub message_count: usize,
}

#[derive(Debug, Default)]
pub struct ThreadStore {
    inner: RwLock<HashMap<String, Arc<ThreadCell>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a thread. The creator is implicitly a participant; caller has
    /// already checked that every participant is registered.
    pub fn create(&self, creator: &str, name: &str, participants: &[String]) -> String {
        let thread_id = format!("thr_{}", Uuid::new_v4().simple());
        let mut set: HashSet<String> = participants.iter().cloned().collect();
        set.insert(creator.to_string());

        let cell = Arc::new(ThreadCell {
            thread_id: thread_id.clone(),
            state: Mutex::new(ThreadState {
                name: name.to_string(),
                created_by: creator.to_string(),
                participants: set,
                closed: false,
                log: Vec::new(),
            }),
        });
        self.inner.write().insert(thread_id.clone(), cell);
        thread_id
    }

    fn cell(&self, thread_id: &str) -> Result<Arc<ThreadCell>, OpError> {
        self.inner
            .read()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| OpError::UnknownThread {
                thread_id: thread_id.to_string(),
            })
    }

    /// Append a message, validating sender and mention membership under the
    /// thread lock. Returns the appended message and the delivery targets
    /// (mentions minus the sender). A failed append mutates nothing.
    pub fn append(
        &self,
        thread_id: &str,
        sender_id: &str,
        body: &str,
        explicit_mentions: &[String],
    ) -> Result<(Message, Vec<String>), OpError> {
        let cell = self.cell(thread_id)?;
        let mut state = cell.state.lock();

        if state.closed {
            return Err(OpError::ThreadClosed {
                thread_id: thread_id.to_string(),
            });
        }
        if !state.participants.contains(sender_id) {
            return Err(OpError::NotAParticipant {
                thread_id: thread_id.to_string(),
                agent_id: sender_id.to_string(),
            });
        }

        let mentions = mention_union(explicit_mentions, body);
        for mentioned in &mentions {
            if !state.participants.contains(mentioned) {
                return Err(OpError::MentionNotParticipant {
                    thread_id: thread_id.to_string(),
                    agent_id: mentioned.clone(),
                });
            }
        }

        let message = Message {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            mentions: mentions.clone(),
            posted_at: Utc::now(),
        };
        state.log.push(message.clone());

        let targets = mentions
            .into_iter()
            .filter(|target| target != sender_id)
            .collect();
        Ok((message, targets))
    }

    /// Any existing participant may extend the thread.
    pub fn add_participant(
        &self,
        thread_id: &str,
        requester: &str,
        agent_id: &str,
    ) -> Result<(), OpError> {
        let cell = self.cell(thread_id)?;
        let mut state = cell.state.lock();

        if state.closed {
            return Err(OpError::ThreadClosed {
                thread_id: thread_id.to_string(),
            });
        }
        if !state.participants.contains(requester) {
            return Err(OpError::NotAParticipant {
                thread_id: thread_id.to_string(),
                agent_id: requester.to_string(),
            });
        }
        state.participants.insert(agent_id.to_string());
        Ok(())
    }

    /// Removing the creator is allowed; removing the last participant closes
    /// the thread.
    pub fn remove_participant(
        &self,
        thread_id: &str,
        requester: &str,
        agent_id: &str,
    ) -> Result<(), OpError> {
        let cell = self.cell(thread_id)?;
        let mut state = cell.state.lock();

        if !state.participants.contains(requester) {
            return Err(OpError::NotAParticipant {
                thread_id: thread_id.to_string(),
                agent_id: requester.to_string(),
            });
        }
        if !state.participants.remove(agent_id) {
            return Err(OpError::NotAParticipant {
                thread_id: thread_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        if state.participants.is_empty() {
            state.closed = true;
        }
        Ok(())
    }

    /// Idempotent: closing a closed thread succeeds.
    pub fn close(&self, thread_id: &str) -> Result<(), OpError> {
        let cell = self.cell(thread_id)?;
        cell.state.lock().closed = true;
        Ok(())
    }

    pub fn snapshot(&self, thread_id: &str) -> Result<ThreadSnapshot, OpError> {
        let cell = self.cell(thread_id)?;
        let state = cell.state.lock();
        let mut participants: Vec<String> = state.participants.iter().cloned().collect();
        participants.sort();
        Ok(ThreadSnapshot {
            thread_id: cell.thread_id.clone(),
            name: state.name.clone(),
            created_by: state.created_by.clone(),
            participants,
            closed: state.closed,
            message_count: state.log.len(),
        })
    }

    pub fn messages(&self, thread_id: &str) -> Result<Vec<Message>, OpError> {
        let cell = self.cell(thread_id)?;
        let log = cell.state.lock().log.clone();
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
