//! Active keepalive against idle-connection pruning.
//!
//! Cloud fabrics in front of the Hub prune channels idle for roughly five
//! seconds. A `list_agents` ping every `ping_interval_ms` (default 3000)
//! keeps the session continuously hot. The ping is cheap and idempotent and
//! may overlap a parked `wait_for_mentions` on the same session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::client::ToolSurface;
use crate::config::{KeepaliveConfig, KeepaliveMode};
use crate::connection::RuntimeControl;

pub struct KeepaliveEngine<T: ToolSurface + ?Sized> {
    surface: Arc<T>,
    config: KeepaliveConfig,
}

impl<T: ToolSurface + ?Sized> KeepaliveEngine<T> {
    pub fn new(surface: Arc<T>, config: KeepaliveConfig) -> Self {
        Self { surface, config }
    }

    /// Run the ping loop until shutdown. Ping failures are logged and
    /// swallowed; nothing that happens here may take the dispatch loop down.
    pub async fn run(self, mut control_rx: mpsc::Receiver<RuntimeControl>) {
        if self.config.mode == KeepaliveMode::Off {
            tracing::debug!(target = "hubcast::keepalive", "keepalive disabled");
            return;
        }

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.ping_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; swallow the first tick so pings start
        // one interval after session open.
        ticker.tick().await;

        tracing::info!(
            target = "hubcast::keepalive",
            ping_interval_ms = self.config.ping_interval_ms,
            "active keepalive started"
        );

        loop {
            tokio::select! {
                ctrl = control_rx.recv() => {
                    match ctrl {
                        Some(RuntimeControl::Shutdown) | None => {
                            tracing::info!(target = "hubcast::keepalive", "keepalive stopped");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    match self.surface.list_agents(false).await {
                        Ok(agents) => {
                            tracing::trace!(
                                target = "hubcast::keepalive",
                                peers = agents.len(),
                                "keepalive ping ok"
                            );
                        }
                        Err(error) => {
                            tracing::warn!(
                                target = "hubcast::keepalive",
                                error = %error,
                                "keepalive ping failed"
                            );
                        }
                    }
                }
            }
        }
    }
}
