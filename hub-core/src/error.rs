//! Typed rejections produced by hub operations.

use hubcast::protocol::{ErrorCode, WireError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpError {
    /// The documented wait ceiling. Clients clamp and retry; see
    /// `hubcast::protocol::MAX_WAIT_TIMEOUT_MS`.
    #[error("timeout {requested_ms}ms exceeds maximum {max_ms}ms")]
    TimeoutTooLarge { requested_ms: u64, max_ms: u64 },

    #[error("a wait_for_mentions call is already active for {agent_id}")]
    WaitAlreadyActive { agent_id: String },

    #[error("thread {thread_id} is closed")]
    ThreadClosed { thread_id: String },

    #[error("{agent_id} is not a participant of {thread_id}")]
    NotAParticipant {
        thread_id: String,
        agent_id: String,
    },

    #[error("mentioned agent {agent_id} is not a participant of {thread_id}")]
    MentionNotParticipant {
        thread_id: String,
        agent_id: String,
    },

    #[error("agent {agent_id} is not registered")]
    UnknownAgent { agent_id: String },

    #[error("thread {thread_id} does not exist")]
    UnknownThread { thread_id: String },

    #[error("session {session_id} is not open")]
    UnknownSession { session_id: String },
}

impl OpError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OpError::TimeoutTooLarge { .. } => ErrorCode::TimeoutTooLarge,
            OpError::WaitAlreadyActive { .. } => ErrorCode::WaitAlreadyActive,
            OpError::ThreadClosed { .. } => ErrorCode::ThreadClosed,
            OpError::NotAParticipant { .. } => ErrorCode::NotAParticipant,
            OpError::MentionNotParticipant { .. } => ErrorCode::MentionNotParticipant,
            OpError::UnknownAgent { .. } => ErrorCode::UnknownAgent,
            OpError::UnknownThread { .. } => ErrorCode::UnknownThread,
            OpError::UnknownSession { .. } => ErrorCode::UnknownSession,
        }
    }

    /// A retry with the same correlation id can only help for stale-session
    /// rejections, where the reconnect installs a fresh session id.
    pub fn retryable(&self) -> bool {
        matches!(self, OpError::UnknownSession { .. })
    }

    pub fn wire(&self) -> WireError {
        WireError {
            code: self.code(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}
