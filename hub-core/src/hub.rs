//! The coordination hub: one value constructed at process start, owning the
//! registry, the thread store, and the reply cache. The transport layer
//! (SSE + POST) hands decoded frames to `handle_rpc` and pumps the
//! downstream receivers returned by `open_session`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use hubcast::protocol::{
    decode_request, DecodedRequest, ProtocolViolation, ReplyFrame, ServerFrame, ToolReply,
    ToolRequest,
};
use hubcast::types::{MentionDelivery, SessionHandshake};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::HubConfig;
use crate::dedup::ReplyCache;
use crate::error::OpError;
use crate::registry::SessionRegistry;
use crate::threads::{Message, ThreadStore};

pub struct Hub {
    pub config: HubConfig,
    registry: SessionRegistry,
    threads: ThreadStore,
    replies: Mutex<ReplyCache>,
    started_at: Instant,
}

impl Hub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(config.mention_buffer_cap, config.downstream_cap),
            threads: ThreadStore::new(),
            replies: Mutex::new(ReplyCache::new(config.reply_cache_ttl, config.reply_cache_cap)),
            started_at: Instant::now(),
            config,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Open (or displace/reattach) a session and announce it downstream.
    /// Returns the session id and the receiver the transport pumps to the
    /// client; dropping the receiver's sender side ends the stream.
    pub fn open_session(
        &self,
        handshake: &SessionHandshake,
    ) -> (String, mpsc::Receiver<ServerFrame>) {
        let open = self.registry.open(handshake);

        if let Some(old) = open.displaced {
            tracing::info!(
                target = "hub_core::sessions",
                agent_id = %handshake.agent_id,
                "displacing older session"
            );
            let _ = old.try_send(ServerFrame::Displaced {
                reason: format!(
                    "agent {} opened a newer session",
                    handshake.agent_id
                ),
            });
            let _ = old.try_send(ServerFrame::SessionClosed {
                reason: "displaced".to_string(),
            });
            // Dropping the old sender here ends the displaced SSE stream.
        }

        let announce = ServerFrame::SessionOpened {
            session_id: open.session_id.clone(),
            agent_id: handshake.agent_id.clone(),
            heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
            max_wait_timeout_ms: self.config.max_wait_ms,
        };
        if let Some(downstream) = self.registry.downstream_for_session(&open.session_id) {
            let _ = downstream.try_send(announce);
        }

        if !open.reattached {
            self.broadcast_except(
                ServerFrame::AgentJoined {
                    agent_id: handshake.agent_id.clone(),
                },
                &open.session_id,
            );
        }

        tracing::info!(
            target = "hub_core::sessions",
            agent_id = %handshake.agent_id,
            session_id = %open.session_id,
            reattached = open.reattached,
            "session open"
        );
        (open.session_id, open.frames)
    }

    /// Idempotent. Starts the agent's grace window; full eviction happens in
    /// the maintenance loop.
    pub fn close_session(&self, session_id: &str, reason: &str) {
        if let Some(agent_id) = self.registry.close(session_id) {
            tracing::info!(
                target = "hub_core::sessions",
                agent_id = %agent_id,
                session_id = %session_id,
                reason = %reason,
                "session closed"
            );
        }
    }

    /// Push one heartbeat to a session. Returns false when the session is
    /// gone (the caller's pump loop should stop). A session that cannot
    /// drain its channel is terminated rather than allowed to stall the Hub.
    pub fn send_heartbeat(&self, session_id: &str, seq: u64) -> bool {
        let Some(downstream) = self.registry.downstream_for_session(session_id) else {
            return false;
        };
        match downstream.try_send(ServerFrame::Heartbeat {
            seq,
            ts_ms: Utc::now().timestamp_millis(),
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    target = "hub_core::sessions",
                    session_id = %session_id,
                    "push channel saturated, terminating slow session"
                );
                self.close_session(session_id, "backpressure");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Handle one decoded tool-surface frame for a session.
    ///
    /// `Err` means the frame violated the protocol (missing discriminator or
    /// malformed payload); the transport terminates the session. Unknown
    /// kinds are tolerated and answered with an `ignored` reply.
    pub async fn handle_rpc(
        &self,
        session_id: &str,
        frame: &Value,
    ) -> Result<ReplyFrame, ProtocolViolation> {
        let frame = match decode_request(frame)? {
            DecodedRequest::Unknown {
                kind,
                correlation_id,
            } => {
                tracing::debug!(
                    target = "hub_core::rpc",
                    kind = %kind,
                    "ignoring unknown request kind"
                );
                return Ok(ReplyFrame::new(correlation_id, ToolReply::Ignored { kind }));
            }
            DecodedRequest::Known(frame) => frame,
        };

        let agent_id = match self.registry.touch(session_id) {
            Ok(agent_id) => agent_id,
            Err(error) => {
                return Ok(ReplyFrame::new(
                    frame.correlation_id,
                    ToolReply::Error(error.wire()),
                ))
            }
        };

        let dedup_key = frame
            .correlation_id
            .as_ref()
            .filter(|_| frame.request.wants_dedup())
            .cloned();
        if let Some(key) = &dedup_key {
            if let Some(cached) = self.replies.lock().get(key, Instant::now()) {
                tracing::debug!(
                    target = "hub_core::rpc",
                    correlation_id = %key,
                    "replaying deduplicated reply"
                );
                return Ok(ReplyFrame::new(frame.correlation_id, cached));
            }
        }

        let reply = match self.dispatch(&agent_id, frame.request).await {
            Ok(reply) => reply,
            Err(error) => ToolReply::Error(error.wire()),
        };

        if let Some(key) = &dedup_key {
            self.replies.lock().put(key, reply.clone(), Instant::now());
        }
        Ok(ReplyFrame::new(frame.correlation_id, reply))
    }

    async fn dispatch(&self, agent_id: &str, request: ToolRequest) -> Result<ToolReply, OpError> {
        match request {
            ToolRequest::ListAgents { include_details } => Ok(ToolReply::Agents {
                agents: self.registry.list(include_details),
            }),
            ToolRequest::CreateThread { name, participants } => {
                for participant in &participants {
                    if !self.registry.is_registered(participant) {
                        return Err(OpError::UnknownAgent {
                            agent_id: participant.clone(),
                        });
                    }
                }
                let thread_id = self.threads.create(agent_id, &name, &participants);
                tracing::debug!(
                    target = "hub_core::threads",
                    thread_id = %thread_id,
                    creator = %agent_id,
                    participants = participants.len() + 1,
                    "thread created"
                );
                Ok(ToolReply::ThreadCreated { thread_id })
            }
            ToolRequest::AddParticipant {
                thread_id,
                agent_id: new_participant,
            } => {
                if !self.registry.is_registered(&new_participant) {
                    return Err(OpError::UnknownAgent {
                        agent_id: new_participant,
                    });
                }
                self.threads
                    .add_participant(&thread_id, agent_id, &new_participant)?;
                Ok(ToolReply::ParticipantAdded {
                    thread_id,
                    agent_id: new_participant,
                })
            }
            ToolRequest::RemoveParticipant {
                thread_id,
                agent_id: target,
            } => {
                self.threads
                    .remove_participant(&thread_id, agent_id, &target)?;
                Ok(ToolReply::ParticipantRemoved {
                    thread_id,
                    agent_id: target,
                })
            }
            ToolRequest::SendMessage {
                thread_id,
                body,
                mentions,
            } => {
                let (message, targets) =
                    self.threads.append(&thread_id, agent_id, &body, &mentions)?;
                self.route_mentions(&message, &targets);
                Ok(ToolReply::MessageSent {
                    message_id: message.message_id,
                })
            }
            ToolRequest::CloseThread { thread_id } => {
                self.threads.close(&thread_id)?;
                Ok(ToolReply::ThreadClosed { thread_id })
            }
            ToolRequest::WaitForMentions { timeout_ms } => {
                let mentions = self.wait_for_mentions(agent_id, timeout_ms).await?;
                Ok(ToolReply::Mentions { mentions })
            }
        }
    }

    /// Fan a freshly appended message out to its mentioned agents' buffers.
    /// Targets evicted since thread creation are skipped; the sender was
    /// already excluded by the append.
    fn route_mentions(&self, message: &Message, targets: &[String]) {
        for target in targets {
            let Some(mailbox) = self.registry.mailbox(target) else {
                tracing::debug!(
                    target = "hub_core::router",
                    agent_id = %target,
                    message_id = %message.message_id,
                    "mention target departed, dropping delivery"
                );
                continue;
            };
            let overflowed = mailbox.push(MentionDelivery {
                thread_id: message.thread_id.clone(),
                message_id: message.message_id.clone(),
                sender_id: message.sender_id.clone(),
                body: message.body.clone(),
                posted_at: message.posted_at,
            });
            if overflowed {
                tracing::warn!(
                    target = "hub_core::router",
                    agent_id = %target,
                    "mention buffer overflow, oldest delivery dropped"
                );
            }
        }
    }

    async fn wait_for_mentions(
        &self,
        agent_id: &str,
        timeout_ms: u64,
    ) -> Result<Vec<MentionDelivery>, OpError> {
        if timeout_ms > self.config.max_wait_ms {
            return Err(OpError::TimeoutTooLarge {
                requested_ms: timeout_ms,
                max_ms: self.config.max_wait_ms,
            });
        }
        let mailbox = self
            .registry
            .mailbox(agent_id)
            .ok_or_else(|| OpError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
        mailbox
            .wait(
                agent_id,
                std::time::Duration::from_millis(timeout_ms),
                self.config.wait_batch_cap,
            )
            .await
    }

    fn broadcast_except(&self, frame: ServerFrame, except_session: &str) {
        let mut saturated = Vec::new();
        for (_, session_id, downstream) in self.registry.live_downstreams() {
            if session_id == except_session {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = downstream.try_send(frame.clone()) {
                saturated.push(session_id);
            }
        }
        for session_id in saturated {
            tracing::warn!(
                target = "hub_core::sessions",
                session_id = %session_id,
                "push channel saturated during broadcast, terminating slow session"
            );
            self.close_session(&session_id, "backpressure");
        }
    }

    /// Evict registrations whose grace window expired and tell the fabric.
    pub fn evict_expired(&self) -> Vec<String> {
        let evicted = self.registry.evict_expired(self.config.reconnect_grace);
        for agent_id in &evicted {
            tracing::info!(
                target = "hub_core::sessions",
                agent_id = %agent_id,
                "agent evicted after grace window"
            );
            self.broadcast_except(
                ServerFrame::AgentLeft {
                    agent_id: agent_id.clone(),
                    reason: "evicted".to_string(),
                },
                "",
            );
        }
        evicted
    }

    /// Periodic eviction, run alongside the server until shutdown.
    pub async fn run_maintenance(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evict_expired();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
