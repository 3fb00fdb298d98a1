//! Runtime configuration for a client agent process.
//!
//! All recognized environment variables are collected here once, rather
//! than being looked up ad hoc throughout the runtime:
//!
//! | Variable | Effect |
//! |---|---|
//! | `HUB_URL` | base coordination endpoint |
//! | `AGENT_ID` | stable identity of this agent process |
//! | `AGENT_DESCRIPTION` | human-readable description sent at session open |
//! | `AGENT_CAPABILITIES` | comma-separated capability tags |
//! | `APPLICATION_ID` / `PRIVACY_KEY` | application scoping tuple |
//! | `WAIT_FOR_AGENTS` | advisory minimum peer count |
//! | `KEEPALIVE_MODE` | `off` or `active` |
//! | `KEEPALIVE_INTERVAL_MS` | ping spacing, default 3000 |
//! | `WAIT_TIMEOUT_MS` | default per-wait budget |
//! | `RECONNECT_MAX_BACKOFF_MS` | cap on reconnect backoff |

use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_HUB_URL: &str = "http://127.0.0.1:5555";
pub const DEFAULT_PING_INTERVAL_MS: u64 = 3_000;
/// Default wait budget: one ping interval plus a second, so a wait in
/// flight combined with pings still defeats a ~5s idle-prune window.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 4_000;
pub const DEFAULT_RECONNECT_MAX_BACKOFF_MS: u64 = 16_000;
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Keepalive policy. `Off` is the default on developer workstations;
/// `Active` pings the Hub with `list_agents` to keep the channel hot under
/// cloud fabrics that prune idle connections after ~5 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepaliveMode {
    #[default]
    Off,
    Active,
}

impl FromStr for KeepaliveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(KeepaliveMode::Off),
            "active" => Ok(KeepaliveMode::Active),
            other => Err(format!("unrecognized keepalive mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub mode: KeepaliveMode,
    /// Must stay below the deployment's observed idle-prune window
    /// (empirically 5000ms on the target cloud).
    pub ping_interval_ms: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            mode: KeepaliveMode::Off,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub hub_url: String,
    pub agent_id: String,
    pub agent_description: String,
    pub capabilities: Vec<String>,
    pub application_id: String,
    pub privacy_key: String,
    pub wait_for_agents: u32,
    pub keepalive: KeepaliveConfig,
    pub wait_timeout_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    /// Sleep between consecutive empty wait batches in the dispatch loop.
    pub idle_backoff_ms: u64,
}

impl RuntimeConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            agent_id: agent_id.into(),
            agent_description: String::new(),
            capabilities: Vec::new(),
            application_id: "default".to_string(),
            privacy_key: "devkey".to_string(),
            wait_for_agents: 0,
            keepalive: KeepaliveConfig::default(),
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            reconnect_max_backoff_ms: DEFAULT_RECONNECT_MAX_BACKOFF_MS,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
        }
    }

    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary lookup, which keeps tests
    /// independent of process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let agent_id = lookup("AGENT_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("AGENT_ID"))?;
        let mut config = Self::new(agent_id.trim().to_string());

        if let Some(url) = lookup("HUB_URL") {
            config.hub_url = url.trim_end_matches('/').to_string();
        }
        if let Some(description) = lookup("AGENT_DESCRIPTION") {
            config.agent_description = description;
        }
        if let Some(caps) = lookup("AGENT_CAPABILITIES") {
            config.capabilities = caps
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Some(app) = lookup("APPLICATION_ID") {
            config.application_id = app;
        }
        if let Some(key) = lookup("PRIVACY_KEY") {
            config.privacy_key = key;
        }
        if let Some(raw) = lookup("WAIT_FOR_AGENTS") {
            config.wait_for_agents = parse("WAIT_FOR_AGENTS", &raw)?;
        }
        if let Some(raw) = lookup("KEEPALIVE_MODE") {
            config.keepalive.mode = raw.parse().map_err(|_| ConfigError::Invalid {
                name: "KEEPALIVE_MODE",
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("KEEPALIVE_INTERVAL_MS") {
            config.keepalive.ping_interval_ms = parse("KEEPALIVE_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("WAIT_TIMEOUT_MS") {
            config.wait_timeout_ms = parse("WAIT_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("RECONNECT_MAX_BACKOFF_MS") {
            config.reconnect_max_backoff_ms = parse("RECONNECT_MAX_BACKOFF_MS", &raw)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
