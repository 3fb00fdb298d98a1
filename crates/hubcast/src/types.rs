//! Shared data types for the hub wire protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One agent in a `list_agents` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Populated only when the listing was requested with details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<AgentDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDetails {
    pub registered_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Whether the agent currently has a live push channel (an agent inside
    /// its reconnect grace window is listed but not connected).
    pub connected: bool,
    pub mention_buffer_depth: usize,
    /// Deliveries dropped from the mention buffer since registration.
    pub mention_buffer_dropped: u64,
    pub wait_for_agents: u32,
}

/// A single unit of addressed work handed to a mentioned agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionDelivery {
    pub thread_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub body: String,
    pub posted_at: DateTime<Utc>,
}

/// Query parameters of the session-open handshake.
///
/// The URL form is part of the external contract: stable enough to paste
/// into configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandshake {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "agentDescription", default)]
    pub agent_description: String,
    #[serde(rename = "capabilities", default)]
    pub capabilities: Option<String>,
    /// Advisory minimum peer count; the runtime may hold off real work until
    /// this many agents are registered.
    #[serde(rename = "waitForAgents", default)]
    pub wait_for_agents: u32,
    #[serde(rename = "applicationId", default)]
    pub application_id: String,
    #[serde(rename = "privacyKey", default)]
    pub privacy_key: String,
}

impl SessionHandshake {
    /// Capabilities travel as a comma-separated query value.
    pub fn capabilities_vec(&self) -> Vec<String> {
        self.capabilities
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}
