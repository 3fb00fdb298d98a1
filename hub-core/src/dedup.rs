//! Correlation-id reply cache.
//!
//! `create_thread` and `send_message` are not naturally idempotent, so the
//! client keeps one correlation id across retry attempts and the Hub
//! replays the original reply from this cache instead of re-executing.
//! Entries expire after a short TTL and the cache is bounded.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use hubcast::protocol::ToolReply;

#[derive(Debug)]
pub struct ReplyCache {
    ttl: Duration,
    max_entries: usize,
    seen: HashMap<String, (Instant, ToolReply)>,
    order: VecDeque<(String, Instant)>,
}

impl ReplyCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Look up the cached reply for a correlation id, if still fresh.
    pub fn get(&mut self, correlation_id: &str, now: Instant) -> Option<ToolReply> {
        self.evict(now);
        self.seen
            .get(correlation_id)
            .map(|(_, reply)| reply.clone())
    }

    pub fn put(&mut self, correlation_id: &str, reply: ToolReply, now: Instant) {
        self.evict(now);
        if self.seen.contains_key(correlation_id) {
            return;
        }

        self.seen
            .insert(correlation_id.to_string(), (now, reply));
        self.order.push_back((correlation_id.to_string(), now));

        while self.seen.len() > self.max_entries {
            if let Some((old_id, _)) = self.order.pop_front() {
                self.seen.remove(&old_id);
            }
        }

        debug_assert_eq!(
            self.seen.len(),
            self.order.len(),
            "ReplyCache: HashMap and VecDeque out of sync"
        );
    }

    fn evict(&mut self, now: Instant) {
        while let Some((id, ts)) = self.order.front().cloned() {
            if now.duration_since(ts) < self.ttl {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
