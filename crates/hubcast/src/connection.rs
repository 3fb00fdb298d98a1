//! Session-stable SSE connection to the Hub.
//!
//! One long-lived downstream stream per agent process. The manager owns the
//! reconnect loop: on any transport failure it re-opens the stream with the
//! same agent id and exponential backoff, so the agent's identity (and its
//! mention routing) survives session churn. Session ids are opaque and are
//! published through a watch channel for the operation client to pick up.

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::config::RuntimeConfig;
use crate::error::{HubError, Result};
use crate::protocol::{decode_server_frame, ServerFrame};

/// Control messages accepted by the long-running runtime tasks.
#[derive(Debug, Clone)]
pub enum RuntimeControl {
    Shutdown,
}

pub struct ConnectionManager {
    config: RuntimeConfig,
    http: reqwest::Client,
    session_tx: watch::Sender<Option<String>>,
}

impl ConnectionManager {
    pub fn new(config: RuntimeConfig) -> (Self, watch::Receiver<Option<String>>) {
        let (session_tx, session_rx) = watch::channel(None);
        (
            Self {
                config,
                http: reqwest::Client::new(),
                session_tx,
            },
            session_rx,
        )
    }

    /// The session-open URL, with the identity handshake in the query
    /// string. Stable enough to paste into configuration.
    pub fn sse_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/sse", self.config.hub_url))?;
        url.query_pairs_mut()
            .append_pair("agentId", &self.config.agent_id)
            .append_pair("agentDescription", &self.config.agent_description)
            .append_pair("waitForAgents", &self.config.wait_for_agents.to_string())
            .append_pair("applicationId", &self.config.application_id)
            .append_pair("privacyKey", &self.config.privacy_key);
        if !self.config.capabilities.is_empty() {
            url.query_pairs_mut()
                .append_pair("capabilities", &self.config.capabilities.join(","));
        }
        Ok(url)
    }

    /// Run the connection loop until shutdown. Decoded push frames are
    /// forwarded to `frame_tx`; the current session id is published on the
    /// watch channel (and cleared while disconnected).
    pub async fn run(
        &self,
        frame_tx: mpsc::Sender<ServerFrame>,
        mut control_rx: mpsc::Receiver<RuntimeControl>,
    ) {
        let mut attempt = 0u32;
        let mut has_connected = false;

        loop {
            let url = match self.sse_url() {
                Ok(url) => url,
                Err(error) => {
                    tracing::error!(
                        target = "hubcast::connection",
                        error = %error,
                        "invalid hub URL, giving up"
                    );
                    return;
                }
            };

            let mut stream = match EventSource::new(self.http.get(url.clone())) {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(
                        target = "hubcast::connection",
                        error = %error,
                        "failed to build SSE request, giving up"
                    );
                    return;
                }
            };

            let mut broken = false;
            while !broken {
                tokio::select! {
                    ctrl = control_rx.recv() => {
                        match ctrl {
                            Some(RuntimeControl::Shutdown) | None => {
                                stream.close();
                                self.session_tx.send_replace(None);
                                return;
                            }
                        }
                    }
                    event = stream.next() => {
                        match event {
                            Some(Ok(Event::Open)) => {
                                let status = if has_connected { "reconnected" } else { "connected" };
                                has_connected = true;
                                tracing::info!(
                                    target = "hubcast::connection",
                                    agent_id = %self.config.agent_id,
                                    status,
                                    "hub stream open"
                                );
                            }
                            Some(Ok(Event::Message(message))) => {
                                let Some(frame) = decode_server_frame(&message.data) else {
                                    tracing::debug!(
                                        target = "hubcast::connection",
                                        data = %message.data,
                                        "ignoring unrecognized push frame"
                                    );
                                    continue;
                                };
                                if let ServerFrame::SessionOpened { ref session_id, .. } = frame {
                                    attempt = 0;
                                    self.session_tx.send_replace(Some(session_id.clone()));
                                }
                                if let ServerFrame::Displaced { ref reason } = frame {
                                    tracing::warn!(
                                        target = "hubcast::connection",
                                        reason = %reason,
                                        "session displaced by a newer registration"
                                    );
                                }
                                if frame_tx.send(frame).await.is_err() {
                                    // Runtime is gone; nothing left to feed.
                                    stream.close();
                                    self.session_tx.send_replace(None);
                                    return;
                                }
                            }
                            Some(Err(error)) => {
                                tracing::warn!(
                                    target = "hubcast::connection",
                                    error = %error,
                                    "hub stream failed"
                                );
                                stream.close();
                                broken = true;
                            }
                            None => {
                                stream.close();
                                broken = true;
                            }
                        }
                    }
                }
            }

            self.session_tx.send_replace(None);
            attempt += 1;
            let delay = reconnect_delay(attempt, self.config.reconnect_max_backoff_ms);
            tracing::info!(
                target = "hubcast::connection",
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                ctrl = control_rx.recv() => {
                    match ctrl {
                        Some(RuntimeControl::Shutdown) | None => return,
                    }
                }
            }
        }
    }
}

/// Wait until the connection manager has published a live session id.
pub async fn wait_for_session(session_rx: &mut watch::Receiver<Option<String>>) -> Result<String> {
    loop {
        if let Some(session_id) = session_rx.borrow().clone() {
            return Ok(session_id);
        }
        session_rx
            .changed()
            .await
            .map_err(|_| HubError::NotConnected)?;
    }
}

/// Exponential backoff: 1s, 2s, 4s… capped at `cap_ms`, with jitter.
pub fn reconnect_delay(attempt: u32, cap_ms: u64) -> Duration {
    let base_ms = (1_000u64).saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let bounded = base_ms.min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(bounded + jitter)
}
