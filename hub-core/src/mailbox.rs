//! Per-agent mention buffer with long-poll wait semantics.
//!
//! A bounded FIFO of pending deliveries plus the parking logic behind
//! `wait_for_mentions`. The lock is a plain mutex and is never held across
//! an await; parked waiters sleep on a `Notify` and re-check state on wake.

use std::collections::VecDeque;
use std::time::Duration;

use hubcast::types::MentionDelivery;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::OpError;

#[derive(Debug)]
pub struct Mailbox {
    cap: usize,
    state: Mutex<MailboxState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<MentionDelivery>,
    dropped: u64,
    wait_active: bool,
    /// Bumped on session close/displacement to cancel a parked wait.
    epoch: u64,
}

impl Mailbox {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a delivery, waking any parked waiter. Returns true when the
    /// soft cap forced the oldest entry out.
    pub fn push(&self, delivery: MentionDelivery) -> bool {
        let overflowed = {
            let mut state = self.state.lock();
            let overflowed = if state.queue.len() >= self.cap {
                state.queue.pop_front();
                state.dropped += 1;
                true
            } else {
                false
            };
            state.queue.push_back(delivery);
            overflowed
        };
        self.notify.notify_one();
        overflowed
    }

    pub fn depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Deliveries dropped by overflow since registration.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    /// Cancel a parked wait (session close or displacement). The parked
    /// caller completes with an empty batch; queued deliveries stay put for
    /// a reconnect within the grace window.
    pub fn interrupt(&self) {
        {
            let mut state = self.state.lock();
            state.epoch += 1;
        }
        self.notify.notify_one();
    }

    /// Block until the buffer is non-empty, the timeout elapses, or the
    /// session is interrupted. At most one wait may be active at a time.
    pub async fn wait(
        &self,
        agent_id: &str,
        timeout: Duration,
        batch_cap: usize,
    ) -> Result<Vec<MentionDelivery>, OpError> {
        let _guard = self.begin_wait(agent_id)?;
        let entry_epoch = self.state.lock().epoch;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let mut state = self.state.lock();
                if state.epoch != entry_epoch {
                    return Ok(Vec::new());
                }
                if !state.queue.is_empty() {
                    let n = state.queue.len().min(batch_cap);
                    return Ok(state.queue.drain(..n).collect());
                }
            }
            // A push between the check above and this await leaves a permit
            // on the Notify, so the wakeup cannot be lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    fn begin_wait(&self, agent_id: &str) -> Result<WaitGuard<'_>, OpError> {
        let mut state = self.state.lock();
        if state.wait_active {
            return Err(OpError::WaitAlreadyActive {
                agent_id: agent_id.to_string(),
            });
        }
        state.wait_active = true;
        Ok(WaitGuard { mailbox: self })
    }
}

/// Clears the single-flight flag on every exit path of `wait`.
struct WaitGuard<'a> {
    mailbox: &'a Mailbox,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.mailbox.state.lock().wait_active = false;
    }
}
