//! # hubcast
//!
//! Client SDK and runtime for the agent-hub coordination fabric: a central
//! hub where long-lived agent processes register under stable ids, form
//! named threads, and exchange mention-addressed messages.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hubcast::{ConnectionManager, HubClient, RuntimeConfig, ToolSurface};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = RuntimeConfig::new("media");
//!     config.hub_url = "http://127.0.0.1:5555".to_string();
//!
//!     // The connection manager owns the SSE stream and reconnects;
//!     // the client picks the current session up through the watch channel.
//!     let (manager, mut session_rx) = ConnectionManager::new(config);
//!     let (frame_tx, _frames) = mpsc::channel(64);
//!     let (_control_tx, control_rx) = mpsc::channel(1);
//!     tokio::spawn(async move { manager.run(frame_tx, control_rx).await });
//!
//!     hubcast::wait_for_session(&mut session_rx).await?;
//!     let client = Arc::new(HubClient::new("http://127.0.0.1:5555", session_rx));
//!
//!     let thread_id = client
//!         .create_thread("t1", &["media".into(), "coord".into()])
//!         .await?;
//!     client
//!         .send_message(&thread_id, "@coord ready when you are", &["coord".into()])
//!         .await?;
//!
//!     // Cost gate: block here; no decision-making happens until a real
//!     // mention arrives.
//!     let batch = client.wait_for_mentions(4_000).await?;
//!     println!("got {} mentions", batch.len());
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod keepalive;
pub mod protocol;
pub mod types;

pub use classifier::{Classification, ClassRule, ClassifierTable};
pub use client::{new_correlation_id, wait_for_peers, HubClient, ToolSurface};
pub use config::{ConfigError, KeepaliveConfig, KeepaliveMode, RuntimeConfig};
pub use connection::{reconnect_delay, wait_for_session, ConnectionManager, RuntimeControl};
pub use dispatch::{AgentBrain, BrainError, DispatchLoop, DispatchStats, OutboundAction};
pub use error::{HubError, Result};
pub use keepalive::KeepaliveEngine;
pub use protocol::{
    decode_request, decode_server_frame, DecodedRequest, ErrorCode, ProtocolViolation, ReplyFrame,
    RequestFrame, ServerFrame, ToolReply, ToolRequest, WireError, MAX_WAIT_TIMEOUT_MS,
    PROTOCOL_VERSION, WAIT_BATCH_CAP,
};
pub use types::{AgentDetails, AgentSummary, MentionDelivery, SessionHandshake};

/// SDK version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
