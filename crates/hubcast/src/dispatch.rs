//! The cost-gated dispatch loop.
//!
//! The loop blocks on `wait_for_mentions` and hands the batch to the local
//! agent brain only when it is non-empty. An agent that receives no
//! mentions performs no decision-making work at all — the brain (typically
//! a language-model call) is never invoked on an empty batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::ToolSurface;
use crate::connection::RuntimeControl;
use crate::error::HubError;
use crate::protocol::MAX_WAIT_TIMEOUT_MS;
use crate::types::MentionDelivery;

/// An operation the brain wants performed on the tool surface, typically a
/// reply into the thread the mention came from.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    SendMessage {
        thread_id: String,
        body: String,
        mentions: Vec<String>,
    },
    CreateThread {
        name: String,
        participants: Vec<String>,
    },
    AddParticipant {
        thread_id: String,
        agent_id: String,
    },
    RemoveParticipant {
        thread_id: String,
        agent_id: String,
    },
    CloseThread {
        thread_id: String,
    },
}

pub type BrainError = Box<dyn std::error::Error + Send + Sync>;

/// The decision-making collaborator behind an agent. Out of scope for the
/// coordination core; the dispatch loop guarantees it is only ever called
/// with at least one delivery.
#[async_trait]
pub trait AgentBrain: Send + Sync {
    async fn handle(&self, batch: &[MentionDelivery]) -> Result<Vec<OutboundAction>, BrainError>;

    /// Called when an outbound action was rejected by the Hub (validation
    /// failure after retries). Default: no-op.
    async fn on_action_failed(&self, _action: &OutboundAction, _error: &HubError) {}
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub waits_issued: AtomicU64,
    pub empty_batches: AtomicU64,
    pub brain_invocations: AtomicU64,
    pub actions_executed: AtomicU64,
    pub actions_failed: AtomicU64,
}

pub struct DispatchLoop<T: ToolSurface + ?Sized, B> {
    surface: Arc<T>,
    brain: B,
    wait_timeout_ms: u64,
    idle_backoff: Duration,
    stats: Arc<DispatchStats>,
}

impl<T: ToolSurface + ?Sized, B: AgentBrain> DispatchLoop<T, B> {
    pub fn new(surface: Arc<T>, brain: B, wait_timeout_ms: u64, idle_backoff_ms: u64) -> Self {
        Self {
            surface,
            brain,
            wait_timeout_ms,
            idle_backoff: Duration::from_millis(idle_backoff_ms),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Run until shutdown. A batch that has been received is always
    /// processed to completion before shutdown is honored.
    pub async fn run(mut self, mut control_rx: mpsc::Receiver<RuntimeControl>) {
        loop {
            self.stats.waits_issued.fetch_add(1, Ordering::SeqCst);
            let outcome = tokio::select! {
                ctrl = control_rx.recv() => {
                    match ctrl {
                        Some(RuntimeControl::Shutdown) | None => break,
                    }
                }
                result = self.surface.wait_for_mentions(self.wait_timeout_ms) => result,
            };

            match outcome {
                Ok(batch) if batch.is_empty() => {
                    self.stats.empty_batches.fetch_add(1, Ordering::SeqCst);
                    tokio::select! {
                        ctrl = control_rx.recv() => {
                            match ctrl {
                                Some(RuntimeControl::Shutdown) | None => break,
                            }
                        }
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
                Ok(batch) => self.process_batch(batch).await,
                Err(error) if error.is_timeout_too_large() => {
                    let clamped = self.wait_timeout_ms.min(MAX_WAIT_TIMEOUT_MS);
                    tracing::warn!(
                        target = "hubcast::dispatch",
                        requested_ms = self.wait_timeout_ms,
                        clamped_ms = clamped,
                        "wait budget above hub maximum, clamping"
                    );
                    self.wait_timeout_ms = clamped;
                }
                Err(error) => {
                    tracing::warn!(
                        target = "hubcast::dispatch",
                        error = %error,
                        "wait_for_mentions failed, backing off"
                    );
                    tokio::select! {
                        ctrl = control_rx.recv() => {
                            match ctrl {
                                Some(RuntimeControl::Shutdown) | None => break,
                            }
                        }
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                    }
                }
            }
        }
        tracing::info!(target = "hubcast::dispatch", "dispatch loop stopped");
    }

    async fn process_batch(&self, batch: Vec<MentionDelivery>) {
        self.stats.brain_invocations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            target = "hubcast::dispatch",
            batch_len = batch.len(),
            thread_id = %batch[0].thread_id,
            "dispatching mention batch"
        );

        let actions = match self.brain.handle(&batch).await {
            Ok(actions) => actions,
            Err(error) => {
                tracing::error!(
                    target = "hubcast::dispatch",
                    error = %error,
                    "agent brain failed"
                );
                self.report_brain_failure(&batch[0]).await;
                return;
            }
        };

        for action in actions {
            match self.execute(&action).await {
                Ok(()) => {
                    self.stats.actions_executed.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => {
                    self.stats.actions_failed.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        target = "hubcast::dispatch",
                        action = ?action,
                        error = %error,
                        "outbound action failed"
                    );
                    self.brain.on_action_failed(&action, &error).await;
                }
            }
        }
    }

    async fn execute(&self, action: &OutboundAction) -> Result<(), HubError> {
        match action {
            OutboundAction::SendMessage {
                thread_id,
                body,
                mentions,
            } => self
                .surface
                .send_message(thread_id, body, mentions)
                .await
                .map(drop),
            OutboundAction::CreateThread { name, participants } => self
                .surface
                .create_thread(name, participants)
                .await
                .map(drop),
            OutboundAction::AddParticipant {
                thread_id,
                agent_id,
            } => self.surface.add_participant(thread_id, agent_id).await,
            OutboundAction::RemoveParticipant {
                thread_id,
                agent_id,
            } => self.surface.remove_participant(thread_id, agent_id).await,
            OutboundAction::CloseThread { thread_id } => {
                self.surface.close_thread(thread_id).await
            }
        }
    }

    /// Tell the originating thread something went wrong, so the sender is
    /// never left waiting on a silent failure.
    async fn report_brain_failure(&self, delivery: &MentionDelivery) {
        let body = format!(
            "@{} I hit an internal error while handling your message and could not complete it.",
            delivery.sender_id
        );
        if let Err(error) = self
            .surface
            .send_message(&delivery.thread_id, &body, &[delivery.sender_id.clone()])
            .await
        {
            tracing::warn!(
                target = "hubcast::dispatch",
                thread_id = %delivery.thread_id,
                error = %error,
                "failed to report brain failure to the thread"
            );
        }
    }
}
