//! Error types for the hubcast SDK.

use thiserror::Error;

use crate::protocol::{ErrorCode, WireError};

/// Errors surfaced by hubcast operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// A typed rejection returned by the Hub.
    #[error("hub error ({code}): {message}")]
    Api {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },

    /// An HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// An SSE stream error.
    #[error("SSE error: {0}")]
    Sse(Box<reqwest_eventsource::Error>),

    /// No session has been established yet (or the connection manager is
    /// between reconnect attempts).
    #[error("no live session. Connect first or wait for the reconnect to complete.")]
    NotConnected,

    /// A second `wait_for_mentions` was issued while one is in flight.
    /// Single-flight is enforced client-side before the Hub ever sees it.
    #[error("a wait_for_mentions call is already in flight")]
    WaitInFlight,

    /// The response was invalid or malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl HubError {
    pub fn api(error: WireError) -> Self {
        Self::Api {
            code: error.code,
            message: error.message,
            retryable: error.retryable,
        }
    }

    /// Whether a retry with the same correlation id may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { retryable, .. } => *retryable,
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::NotConnected => true,
            Self::Sse(_) => true,
            _ => false,
        }
    }

    /// Get the Hub error code, if this is a typed rejection.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout_too_large(&self) -> bool {
        self.code() == Some(ErrorCode::TimeoutTooLarge)
    }
}

impl From<reqwest_eventsource::Error> for HubError {
    fn from(err: reqwest_eventsource::Error) -> Self {
        Self::Sse(Box::new(err))
    }
}

/// Result type alias for hubcast operations.
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::HubError;
    use crate::protocol::{ErrorCode, WireError};

    #[test]
    fn validation_rejections_are_not_retryable() {
        let error = HubError::api(WireError {
            code: ErrorCode::MentionNotParticipant,
            message: "news is not a participant of thr_1".into(),
            retryable: false,
        });
        assert!(!error.is_retryable());
        assert_eq!(error.code(), Some(ErrorCode::MentionNotParticipant));
    }

    #[test]
    fn stale_session_rejections_are_retryable() {
        let error = HubError::api(WireError {
            code: ErrorCode::UnknownSession,
            message: "session ses_1 is not open".into(),
            retryable: true,
        });
        assert!(error.is_retryable());
    }

    #[test]
    fn timeout_too_large_is_detectable() {
        let error = HubError::api(WireError {
            code: ErrorCode::TimeoutTooLarge,
            message: "timeout 120000ms exceeds maximum 60000ms".into(),
            retryable: false,
        });
        assert!(error.is_timeout_too_large());
    }
}
