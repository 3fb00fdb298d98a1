//! HTTP operation client for the Hub tool surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::protocol::{ReplyFrame, RequestFrame, ToolReply, ToolRequest};
use crate::types::{AgentSummary, MentionDelivery};

/// Backoff schedule for operations that fail with a transport-level error.
const RETRY_BACKOFFS_MS: [u64; 3] = [1_000, 2_000, 4_000];
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Slack added on top of the wait budget for the long-poll HTTP request.
const WAIT_HTTP_MARGIN_MS: u64 = 10_000;

/// The fixed set of operations an agent can issue against the Hub.
///
/// `HubClient` is the production implementation; the dispatch loop and
/// keepalive engine are generic over this trait so they can be exercised
/// without a server.
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn list_agents(&self, include_details: bool) -> Result<Vec<AgentSummary>>;
    async fn create_thread(&self, name: &str, participants: &[String]) -> Result<String>;
    async fn add_participant(&self, thread_id: &str, agent_id: &str) -> Result<()>;
    async fn remove_participant(&self, thread_id: &str, agent_id: &str) -> Result<()>;
    async fn send_message(
        &self,
        thread_id: &str,
        body: &str,
        mentions: &[String],
    ) -> Result<String>;
    async fn close_thread(&self, thread_id: &str) -> Result<()>;
    async fn wait_for_mentions(&self, timeout_ms: u64) -> Result<Vec<MentionDelivery>>;
}

/// Client for the short request/response half of the session transport.
///
/// The session id is fed by the connection manager through a watch channel,
/// so operations transparently pick up the new session after a reconnect.
/// Message routing is by agent id on the Hub side; a changed session id
/// never changes who a message reaches.
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    session: watch::Receiver<Option<String>>,
    wait_gate: Arc<tokio::sync::Mutex<()>>,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, session: watch::Receiver<Option<String>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            wait_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_id(&self) -> Result<String> {
        self.session
            .borrow()
            .clone()
            .ok_or(HubError::NotConnected)
    }

    fn rpc_url(&self, session_id: &str) -> String {
        format!("{}/api/sessions/{}/rpc", self.base_url, session_id)
    }

    async fn rpc(&self, frame: &RequestFrame, http_timeout: Duration) -> Result<ToolReply> {
        let session_id = self.session_id()?;
        let response = self
            .http
            .post(self.rpc_url(&session_id))
            .timeout(http_timeout)
            .json(frame)
            .send()
            .await?
            .error_for_status()?;

        let reply: ReplyFrame = response.json().await?;
        match reply.reply {
            ToolReply::Error(error) => Err(HubError::api(error)),
            other => Ok(other),
        }
    }

    /// Issue a request, retrying transport-level failures with exponential
    /// backoff. Non-idempotent requests keep one correlation id across all
    /// attempts so the Hub can deduplicate.
    async fn call_with_retry(&self, request: ToolRequest) -> Result<ToolReply> {
        let http_timeout = match &request {
            ToolRequest::WaitForMentions { timeout_ms } => {
                Duration::from_millis(timeout_ms + WAIT_HTTP_MARGIN_MS)
            }
            _ => Duration::from_secs(REQUEST_TIMEOUT_SECS),
        };
        let frame = if request.wants_dedup() {
            RequestFrame::with_correlation(request, new_correlation_id())
        } else {
            RequestFrame::new(request)
        };

        let mut last_error = None;
        for attempt in 0..=RETRY_BACKOFFS_MS.len() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFFS_MS[attempt - 1])).await;
            }
            match self.rpc(&frame, http_timeout).await {
                Ok(reply) => return Ok(reply),
                Err(error) if error.is_retryable() && attempt < RETRY_BACKOFFS_MS.len() => {
                    tracing::warn!(
                        target = "hubcast::client",
                        attempt = attempt + 1,
                        error = %error,
                        "hub operation failed, retrying"
                    );
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error.unwrap_or(HubError::NotConnected))
    }
}

pub fn new_correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

#[async_trait]
impl ToolSurface for HubClient {
    async fn list_agents(&self, include_details: bool) -> Result<Vec<AgentSummary>> {
        match self
            .call_with_retry(ToolRequest::ListAgents { include_details })
            .await?
        {
            ToolReply::Agents { agents } => Ok(agents),
            other => Err(unexpected_reply("list_agents", &other)),
        }
    }

    async fn create_thread(&self, name: &str, participants: &[String]) -> Result<String> {
        match self
            .call_with_retry(ToolRequest::CreateThread {
                name: name.to_string(),
                participants: participants.to_vec(),
            })
            .await?
        {
            ToolReply::ThreadCreated { thread_id } => Ok(thread_id),
            other => Err(unexpected_reply("create_thread", &other)),
        }
    }

    async fn add_participant(&self, thread_id: &str, agent_id: &str) -> Result<()> {
        match self
            .call_with_retry(ToolRequest::AddParticipant {
                thread_id: thread_id.to_string(),
                agent_id: agent_id.to_string(),
            })
            .await?
        {
            ToolReply::ParticipantAdded { .. } => Ok(()),
            other => Err(unexpected_reply("add_participant", &other)),
        }
    }

    async fn remove_participant(&self, thread_id: &str, agent_id: &str) -> Result<()> {
        match self
            .call_with_retry(ToolRequest::RemoveParticipant {
                thread_id: thread_id.to_string(),
                agent_id: agent_id.to_string(),
            })
            .await?
        {
            ToolReply::ParticipantRemoved { .. } => Ok(()),
            other => Err(unexpected_reply("remove_participant", &other)),
        }
    }

    async fn send_message(
        &self,
        thread_id: &str,
        body: &str,
        mentions: &[String],
    ) -> Result<String> {
        match self
            .call_with_retry(ToolRequest::SendMessage {
                thread_id: thread_id.to_string(),
                body: body.to_string(),
                mentions: mentions.to_vec(),
            })
            .await?
        {
            ToolReply::MessageSent { message_id } => Ok(message_id),
            other => Err(unexpected_reply("send_message", &other)),
        }
    }

    async fn close_thread(&self, thread_id: &str) -> Result<()> {
        match self
            .call_with_retry(ToolRequest::CloseThread {
                thread_id: thread_id.to_string(),
            })
            .await?
        {
            ToolReply::ThreadClosed { .. } => Ok(()),
            other => Err(unexpected_reply("close_thread", &other)),
        }
    }

    async fn wait_for_mentions(&self, timeout_ms: u64) -> Result<Vec<MentionDelivery>> {
        // Single-flight: a second concurrent wait is a client bug the Hub
        // would reject anyway; fail it before it reaches the wire.
        let gate = self.wait_gate.clone();
        let _guard = gate.try_lock().map_err(|_| HubError::WaitInFlight)?;

        match self
            .call_with_retry(ToolRequest::WaitForMentions { timeout_ms })
            .await?
        {
            ToolReply::Mentions { mentions } => Ok(mentions),
            other => Err(unexpected_reply("wait_for_mentions", &other)),
        }
    }
}

fn unexpected_reply(operation: &str, reply: &ToolReply) -> HubError {
    HubError::InvalidResponse(format!("unexpected reply to {operation}: {reply:?}"))
}

/// Poll `list_agents` until at least `min_agents` are registered or the
/// deadline passes. Returns whether the peer count was reached.
///
/// Agents started in a fleet use this to hold off their first real work
/// until the fabric is populated (the `waitForAgents` handshake hint).
pub async fn wait_for_peers<T: ToolSurface + ?Sized>(
    surface: &T,
    min_agents: usize,
    deadline: Duration,
) -> Result<bool> {
    let expires = tokio::time::Instant::now() + deadline;
    loop {
        match surface.list_agents(false).await {
            Ok(agents) if agents.len() >= min_agents => return Ok(true),
            Ok(_) => {}
            Err(error) if error.is_retryable() => {
                tracing::debug!(target = "hubcast::client", error = %error, "peer poll failed");
            }
            Err(error) => return Err(error),
        }
        if tokio::time::Instant::now() >= expires {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(1_000)).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::{new_correlation_id, HubClient};
    use crate::error::HubError;

    #[test]
    fn correlation_ids_are_prefixed_and_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert!(a.starts_with("req_"));
        assert_ne!(a, b);
    }

    #[test]
    fn base_url_is_normalized() {
        let (_tx, rx) = watch::channel(None);
        let client = HubClient::new("http://127.0.0.1:5555/", rx);
        assert_eq!(client.base_url(), "http://127.0.0.1:5555");
        assert_eq!(
            client.rpc_url("ses_1"),
            "http://127.0.0.1:5555/api/sessions/ses_1/rpc"
        );
    }

    #[tokio::test]
    async fn operations_require_a_session() {
        let (_tx, rx) = watch::channel(None);
        let client = HubClient::new("http://127.0.0.1:5555", rx);
        assert!(matches!(
            client.session_id().unwrap_err(),
            HubError::NotConnected
        ));
    }
}
