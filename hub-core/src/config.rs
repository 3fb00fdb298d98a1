//! Hub tunables, collected in one place and constructed at process start.

use std::time::Duration;

use hubcast::protocol::{MAX_WAIT_TIMEOUT_MS, WAIT_BATCH_CAP};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Ceiling on the `timeout_ms` argument of `wait_for_mentions`.
    pub max_wait_ms: u64,
    /// Deliveries drained by a single wait call.
    pub wait_batch_cap: usize,
    /// Soft cap on each agent's mention buffer; oldest dropped on overflow.
    pub mention_buffer_cap: usize,
    /// Bound on the per-session push channel. A session that cannot keep up
    /// is terminated and must reconnect.
    pub downstream_cap: usize,
    /// How long a disconnected agent keeps its registration and mention
    /// buffer before being evicted.
    pub reconnect_grace: Duration,
    /// Spacing of heartbeat frames on the push channel.
    pub heartbeat_interval: Duration,
    /// Retention window for correlation-id reply deduplication.
    pub reply_cache_ttl: Duration,
    pub reply_cache_cap: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: MAX_WAIT_TIMEOUT_MS,
            wait_batch_cap: WAIT_BATCH_CAP,
            mention_buffer_cap: 1024,
            downstream_cap: 256,
            reconnect_grace: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(12),
            reply_cache_ttl: Duration::from_secs(30),
            reply_cache_cap: 8192,
        }
    }
}
