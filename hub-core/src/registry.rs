//! Live-session registry: the Hub's map of agent ids to registrations.
//!
//! One live session per agent id. A second open with the same id displaces
//! the first; a disconnected agent keeps its registration and mention
//! buffer for a grace window so a quick reconnect loses nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hubcast::protocol::ServerFrame;
use hubcast::types::{AgentDetails, AgentSummary, SessionHandshake};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::OpError;
use crate::mailbox::Mailbox;

#[derive(Debug)]
pub struct LiveSession {
    pub session_id: String,
    pub downstream: mpsc::Sender<ServerFrame>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug)]
struct AgentEntry {
    description: String,
    capabilities: Vec<String>,
    registered_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    wait_for_agents: u32,
    mailbox: Arc<Mailbox>,
    live: Option<LiveSession>,
    disconnected_at: Option<Instant>,
}

/// Result of installing a session.
pub struct SessionOpen {
    pub session_id: String,
    pub frames: mpsc::Receiver<ServerFrame>,
    /// The downstream of the session this open displaced, if any. The Hub
    /// notifies it before dropping the sender (which ends its SSE stream).
    pub displaced: Option<mpsc::Sender<ServerFrame>>,
    /// Whether this open reattached to a registration preserved inside the
    /// reconnect grace window.
    pub reattached: bool,
}

pub struct SessionRegistry {
    mention_buffer_cap: usize,
    downstream_cap: usize,
    inner: RwLock<HashMap<String, AgentEntry>>,
}

impl SessionRegistry {
    pub fn new(mention_buffer_cap: usize, downstream_cap: usize) -> Self {
        Self {
            mention_buffer_cap,
            downstream_cap,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Install a session for the handshake's agent id, displacing any
    /// existing live session and reattaching a grace-window registration.
    pub fn open(&self, handshake: &SessionHandshake) -> SessionOpen {
        let session_id = format!("ses_{}", Uuid::new_v4().simple());
        let (downstream, frames) = mpsc::channel(self.downstream_cap);
        let now = Utc::now();

        let mut inner = self.inner.write();
        let (displaced, reattached) = match inner.get_mut(&handshake.agent_id) {
            Some(entry) => {
                // Cancel a wait parked on the old transport; its deliveries
                // stay buffered for the session installed below.
                entry.mailbox.interrupt();
                let displaced = entry.live.take().map(|old| old.downstream);
                let reattached = displaced.is_none();
                entry.description = handshake.agent_description.clone();
                entry.capabilities = handshake.capabilities_vec();
                entry.wait_for_agents = handshake.wait_for_agents;
                entry.last_activity_at = now;
                entry.disconnected_at = None;
                entry.live = Some(LiveSession {
                    session_id: session_id.clone(),
                    downstream: downstream.clone(),
                    opened_at: now,
                });
                (displaced, reattached)
            }
            None => {
                inner.insert(
                    handshake.agent_id.clone(),
                    AgentEntry {
                        description: handshake.agent_description.clone(),
                        capabilities: handshake.capabilities_vec(),
                        registered_at: now,
                        last_activity_at: now,
                        wait_for_agents: handshake.wait_for_agents,
                        mailbox: Arc::new(Mailbox::new(self.mention_buffer_cap)),
                        live: Some(LiveSession {
                            session_id: session_id.clone(),
                            downstream: downstream.clone(),
                            opened_at: now,
                        }),
                        disconnected_at: None,
                    },
                );
                (None, false)
            }
        };

        SessionOpen {
            session_id,
            frames,
            displaced,
            reattached,
        }
    }

    /// Mark the session's agent disconnected, starting its grace window and
    /// cancelling any parked wait. Idempotent; stale session ids are no-ops.
    pub fn close(&self, session_id: &str) -> Option<String> {
        let mut inner = self.inner.write();
        let agent_id = inner.iter().find_map(|(agent_id, entry)| {
            entry
                .live
                .as_ref()
                .filter(|live| live.session_id == session_id)
                .map(|_| agent_id.clone())
        })?;

        let entry = inner.get_mut(&agent_id)?;
        entry.live = None;
        entry.disconnected_at = Some(Instant::now());
        entry.mailbox.interrupt();
        Some(agent_id)
    }

    /// Resolve a session id to its agent, bumping the agent's activity
    /// clock. Every tool-surface operation routes through this, so pings
    /// count as activity.
    pub fn touch(&self, session_id: &str) -> Result<String, OpError> {
        let mut inner = self.inner.write();
        for (agent_id, entry) in inner.iter_mut() {
            if entry
                .live
                .as_ref()
                .is_some_and(|live| live.session_id == session_id)
            {
                entry.last_activity_at = Utc::now();
                return Ok(agent_id.clone());
            }
        }
        Err(OpError::UnknownSession {
            session_id: session_id.to_string(),
        })
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.inner.read().contains_key(agent_id)
    }

    pub fn mailbox(&self, agent_id: &str) -> Option<Arc<Mailbox>> {
        self.inner.read().get(agent_id).map(|e| e.mailbox.clone())
    }

    pub fn downstream_for_session(&self, session_id: &str) -> Option<mpsc::Sender<ServerFrame>> {
        self.inner.read().values().find_map(|entry| {
            entry
                .live
                .as_ref()
                .filter(|live| live.session_id == session_id)
                .map(|live| live.downstream.clone())
        })
    }

    /// Downstreams of every live session, for registry-change notices.
    pub fn live_downstreams(&self) -> Vec<(String, String, mpsc::Sender<ServerFrame>)> {
        self.inner
            .read()
            .iter()
            .filter_map(|(agent_id, entry)| {
                entry.live.as_ref().map(|live| {
                    (
                        agent_id.clone(),
                        live.session_id.clone(),
                        live.downstream.clone(),
                    )
                })
            })
            .collect()
    }

    /// Snapshot for `list_agents`. Readers never block behind an open.
    pub fn list(&self, include_details: bool) -> Vec<AgentSummary> {
        let inner = self.inner.read();
        let mut agents: Vec<AgentSummary> = inner
            .iter()
            .map(|(agent_id, entry)| AgentSummary {
                agent_id: agent_id.clone(),
                description: entry.description.clone(),
                capabilities: entry.capabilities.clone(),
                details: include_details.then(|| AgentDetails {
                    registered_at: entry.registered_at,
                    last_activity_at: entry.last_activity_at,
                    connected: entry.live.is_some(),
                    mention_buffer_depth: entry.mailbox.depth(),
                    mention_buffer_dropped: entry.mailbox.dropped(),
                    wait_for_agents: entry.wait_for_agents,
                }),
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Remove registrations whose grace window has expired. Returns the
    /// evicted agent ids.
    pub fn evict_expired(&self, grace: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .iter()
            .filter_map(|(agent_id, entry)| {
                entry
                    .disconnected_at
                    .filter(|&at| now.duration_since(at) >= grace)
                    .map(|_| agent_id.clone())
            })
            .collect();
        for agent_id in &expired {
            inner.remove(agent_id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hubcast::types::SessionHandshake;

    use super::SessionRegistry;

    fn handshake(agent_id: &str) -> SessionHandshake {
        SessionHandshake {
            agent_id: agent_id.to_string(),
            agent_description: format!("{agent_id} agent"),
            capabilities: None,
            wait_for_agents: 0,
            application_id: "app".to_string(),
            privacy_key: "key".to_string(),
        }
    }

    #[test]
    fn open_installs_exactly_one_live_session() {
        let registry = SessionRegistry::new(16, 8);
        let first = registry.open(&handshake("media"));
        assert!(first.displaced.is_none());
        assert!(!first.reattached);

        let second = registry.open(&handshake("media"));
        assert!(second.displaced.is_some(), "older session is displaced");
        assert_ne!(first.session_id, second.session_id);

        // Only the new session resolves.
        assert!(registry.touch(&first.session_id).is_err());
        assert_eq!(registry.touch(&second.session_id).unwrap(), "media");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn close_starts_the_grace_window_and_preserves_the_mailbox() {
        let registry = SessionRegistry::new(16, 8);
        let open = registry.open(&handshake("media"));
        let mailbox = registry.mailbox("media").unwrap();
        mailbox.push(hubcast::types::MentionDelivery {
            thread_id: "thr_1".into(),
            message_id: "msg_1".into(),
            sender_id: "coord".into(),
            body: "hi".into(),
            posted_at: chrono::Utc::now(),
        });

        assert_eq!(registry.close(&open.session_id).as_deref(), Some("media"));
        assert!(registry.is_registered("media"), "still inside grace window");
        assert!(registry.touch(&open.session_id).is_err());

        let reopened = registry.open(&handshake("media"));
        assert!(reopened.reattached);
        assert_eq!(registry.mailbox("media").unwrap().depth(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let registry = SessionRegistry::new(16, 8);
        let open = registry.open(&handshake("media"));
        assert!(registry.close(&open.session_id).is_some());
        assert!(registry.close(&open.session_id).is_none());
    }

    #[test]
    fn eviction_removes_expired_registrations_only() {
        let registry = SessionRegistry::new(16, 8);
        let gone = registry.open(&handshake("gone"));
        registry.open(&handshake("stays"));
        registry.close(&gone.session_id);

        assert!(registry.evict_expired(Duration::from_secs(30)).is_empty());
        let evicted = registry.evict_expired(Duration::ZERO);
        assert_eq!(evicted, vec!["gone".to_string()]);
        assert!(!registry.is_registered("gone"));
        assert!(registry.is_registered("stays"));
    }

    #[test]
    fn detail_listing_reports_buffer_depth_and_connectivity() {
        let registry = SessionRegistry::new(16, 8);
        let open = registry.open(&handshake("media"));
        registry.open(&handshake("coord"));
        registry.close(&open.session_id);

        let listing = registry.list(true);
        assert_eq!(listing.len(), 2);
        let media = listing.iter().find(|a| a.agent_id == "media").unwrap();
        let details = media.details.as_ref().unwrap();
        assert!(!details.connected);
        assert_eq!(details.mention_buffer_depth, 0);

        let plain = registry.list(false);
        assert!(plain.iter().all(|a| a.details.is_none()));
    }

    #[test]
    fn touch_bumps_activity() {
        let registry = SessionRegistry::new(16, 8);
        let open = registry.open(&handshake("media"));
        let before = registry.list(true)[0]
            .details
            .as_ref()
            .unwrap()
            .last_activity_at;
        std::thread::sleep(Duration::from_millis(5));
        registry.touch(&open.session_id).unwrap();
        let after = registry.list(true)[0]
            .details
            .as_ref()
            .unwrap()
            .last_activity_at;
        assert!(after > before);
    }
}
