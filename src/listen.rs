//! Listen mode: a complete client runtime with a trivial acknowledging
//! brain. Connects, keeps the session alive, and answers every mention so
//! a deployment can be smoke-tested end to end without any real agent
//! logic attached.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hubcast::{
    wait_for_peers, wait_for_session, AgentBrain, BrainError, ConnectionManager, DispatchLoop,
    HubClient, KeepaliveEngine, MentionDelivery, OutboundAction, RuntimeConfig, RuntimeControl,
    ServerFrame,
};
use tokio::sync::mpsc;

#[derive(Debug, clap::Args)]
pub struct ListenCommand {
    /// Agent id for this listener (default: from AGENT_ID).
    #[arg(long)]
    agent_id: Option<String>,

    /// Hub base URL (default: from HUB_URL, then http://127.0.0.1:5555).
    #[arg(long)]
    hub_url: Option<String>,

    /// Keepalive mode: off or active (default: from KEEPALIVE_MODE).
    #[arg(long)]
    keepalive: Option<String>,

    /// Hold off dispatching until this many agents are registered.
    #[arg(long)]
    wait_for_agents: Option<u32>,
}

/// Replies to every mention with an acknowledgment. Stands in for the
/// language-model brain of a real agent.
struct AckBrain {
    agent_id: String,
}

#[async_trait::async_trait]
impl AgentBrain for AckBrain {
    async fn handle(&self, batch: &[MentionDelivery]) -> Result<Vec<OutboundAction>, BrainError> {
        let mut actions = Vec::with_capacity(batch.len());
        for delivery in batch {
            tracing::info!(
                target = "agent_hub::listen",
                thread_id = %delivery.thread_id,
                from = %delivery.sender_id,
                body = %delivery.body,
                "mention received"
            );
            actions.push(OutboundAction::SendMessage {
                thread_id: delivery.thread_id.clone(),
                body: format!("@{} {} received your message", delivery.sender_id, self.agent_id),
                mentions: vec![delivery.sender_id.clone()],
            });
        }
        Ok(actions)
    }
}

pub async fn run_listen(cmd: ListenCommand) -> Result<()> {
    let mut config = match (RuntimeConfig::from_env(), &cmd.agent_id) {
        (Ok(config), _) => config,
        (Err(hubcast::ConfigError::Missing(_)), Some(agent_id)) => {
            RuntimeConfig::new(agent_id.clone())
        }
        (Err(error), _) => return Err(error).context("invalid runtime configuration"),
    };
    if let Some(agent_id) = cmd.agent_id {
        config.agent_id = agent_id;
    }
    if let Some(hub_url) = cmd.hub_url {
        config.hub_url = hub_url.trim_end_matches('/').to_string();
    }
    if let Some(mode) = cmd.keepalive {
        config.keepalive.mode = mode
            .parse()
            .map_err(|error: String| anyhow::anyhow!("invalid --keepalive: {error}"))?;
    }
    if let Some(n) = cmd.wait_for_agents {
        config.wait_for_agents = n;
    }
    if config.agent_description.is_empty() {
        config.agent_description = format!("{} listener runtime", config.agent_id);
    }

    tracing::info!(
        target = "agent_hub::listen",
        agent_id = %config.agent_id,
        hub_url = %config.hub_url,
        keepalive = ?config.keepalive.mode,
        "starting listen runtime"
    );

    let (manager, mut session_rx) = ConnectionManager::new(config.clone());
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(256);
    let (conn_control_tx, conn_control_rx) = mpsc::channel(1);
    let connection = tokio::spawn(async move { manager.run(frame_tx, conn_control_rx).await });

    wait_for_session(&mut session_rx)
        .await
        .context("first session open failed")?;
    let client = Arc::new(HubClient::new(config.hub_url.clone(), session_rx));

    if config.wait_for_agents > 0 {
        let reached = wait_for_peers(
            client.as_ref(),
            config.wait_for_agents as usize,
            Duration::from_secs(60),
        )
        .await?;
        if !reached {
            tracing::warn!(
                target = "agent_hub::listen",
                wanted = config.wait_for_agents,
                "peer count not reached, dispatching anyway"
            );
        }
    }

    // Keepalive starts after the first successful session open.
    let (keepalive_control_tx, keepalive_control_rx) = mpsc::channel(1);
    let keepalive = tokio::spawn(
        KeepaliveEngine::new(client.clone(), config.keepalive.clone()).run(keepalive_control_rx),
    );

    let brain = AckBrain {
        agent_id: config.agent_id.clone(),
    };
    let (dispatch_control_tx, dispatch_control_rx) = mpsc::channel(1);
    let dispatch = tokio::spawn(
        DispatchLoop::new(
            client.clone(),
            brain,
            config.wait_timeout_ms,
            config.idle_backoff_ms,
        )
        .run(dispatch_control_rx),
    );

    let notices = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match frame {
                ServerFrame::AgentJoined { agent_id } => {
                    tracing::info!(target = "agent_hub::listen", agent_id = %agent_id, "agent joined");
                }
                ServerFrame::AgentLeft { agent_id, reason } => {
                    tracing::info!(target = "agent_hub::listen", agent_id = %agent_id, reason = %reason, "agent left");
                }
                ServerFrame::Heartbeat { seq, .. } => {
                    tracing::trace!(target = "agent_hub::listen", seq, "heartbeat");
                }
                other => {
                    tracing::debug!(target = "agent_hub::listen", frame = ?other, "push frame");
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!(target = "agent_hub::listen", "shutting down");

    // Dispatch drains first, keepalive second, transport last.
    let _ = dispatch_control_tx.send(RuntimeControl::Shutdown).await;
    let _ = dispatch.await;
    let _ = keepalive_control_tx.send(RuntimeControl::Shutdown).await;
    let _ = keepalive.await;
    let _ = conn_control_tx.send(RuntimeControl::Shutdown).await;
    let _ = connection.await;
    notices.abort();

    Ok(())
}
