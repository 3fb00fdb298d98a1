//! Wire protocol shared by the Hub and the client runtime.
//!
//! Every frame is a self-describing JSON object carrying a `kind`
//! discriminator and an optional `correlation_id`. Requests travel as short
//! POST bodies; server frames arrive on the per-session SSE push channel.
//! Frames without a `kind` are protocol violations; frames with an unknown
//! `kind` are tolerated for forward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentSummary, MentionDelivery};

pub const PROTOCOL_VERSION: u32 = 1;

/// Ceiling on the `timeout_ms` argument of `wait_for_mentions`.
///
/// Requests above this fail with `timeout_too_large`. This limit has broken
/// interop before; clients are expected to clamp and retry rather than
/// assume an unbounded wait.
pub const MAX_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Maximum number of deliveries drained by a single wait call.
pub const WAIT_BATCH_CAP: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ToolRequest {
    ListAgents {
        #[serde(default)]
        include_details: bool,
    },
    CreateThread {
        name: String,
        participants: Vec<String>,
    },
    AddParticipant {
        thread_id: String,
        agent_id: String,
    },
    RemoveParticipant {
        thread_id: String,
        agent_id: String,
    },
    SendMessage {
        thread_id: String,
        body: String,
        #[serde(default)]
        mentions: Vec<String>,
    },
    CloseThread {
        thread_id: String,
    },
    WaitForMentions {
        timeout_ms: u64,
    },
}

impl ToolRequest {
    /// Requests that mutate state non-idempotently and therefore carry a
    /// correlation id for retry deduplication on the Hub.
    pub fn wants_dedup(&self) -> bool {
        matches!(
            self,
            ToolRequest::CreateThread { .. } | ToolRequest::SendMessage { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub request: ToolRequest,
}

impl RequestFrame {
    pub fn new(request: ToolRequest) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            correlation_id: None,
            request,
        }
    }

    pub fn with_correlation(request: ToolRequest, correlation_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            correlation_id: Some(correlation_id.into()),
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ToolReply {
    Agents {
        agents: Vec<AgentSummary>,
    },
    ThreadCreated {
        thread_id: String,
    },
    ParticipantAdded {
        thread_id: String,
        agent_id: String,
    },
    ParticipantRemoved {
        thread_id: String,
        agent_id: String,
    },
    MessageSent {
        message_id: String,
    },
    ThreadClosed {
        thread_id: String,
    },
    Mentions {
        mentions: Vec<MentionDelivery>,
    },
    /// Reply to a request whose `kind` this Hub does not understand.
    Ignored {
        kind: String,
    },
    Error(WireError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub reply: ToolReply,
}

impl ReplyFrame {
    pub fn new(correlation_id: Option<String>, reply: ToolReply) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            correlation_id,
            reply,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TimeoutTooLarge,
    WaitAlreadyActive,
    ThreadClosed,
    NotAParticipant,
    MentionNotParticipant,
    UnknownAgent,
    UnknownThread,
    UnknownSession,
    DuplicateAgent,
    ProtocolError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TimeoutTooLarge => "timeout_too_large",
            ErrorCode::WaitAlreadyActive => "wait_already_active",
            ErrorCode::ThreadClosed => "thread_closed",
            ErrorCode::NotAParticipant => "not_a_participant",
            ErrorCode::MentionNotParticipant => "mention_not_participant",
            ErrorCode::UnknownAgent => "unknown_agent",
            ErrorCode::UnknownThread => "unknown_thread",
            ErrorCode::UnknownSession => "unknown_session",
            ErrorCode::DuplicateAgent => "duplicate_agent",
            ErrorCode::ProtocolError => "protocol_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frames pushed by the Hub on the SSE channel.
///
/// None of these carry a correlation id — they are notifications, and the
/// client must route them on `kind` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    SessionOpened {
        session_id: String,
        agent_id: String,
        heartbeat_interval_ms: u64,
        max_wait_timeout_ms: u64,
    },
    Heartbeat {
        seq: u64,
        ts_ms: i64,
    },
    AgentJoined {
        agent_id: String,
    },
    AgentLeft {
        agent_id: String,
        reason: String,
    },
    Displaced {
        reason: String,
    },
    SessionClosed {
        reason: String,
    },
}

/// A client frame that failed structural validation. The Hub terminates the
/// offending session.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("protocol violation: {0}")]
pub struct ProtocolViolation(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRequest {
    Known(RequestFrame),
    /// Unrecognized `kind` — tolerated and ignored for forward compatibility.
    Unknown {
        kind: String,
        correlation_id: Option<String>,
    },
}

/// Decode an inbound client frame.
///
/// The discriminator is checked before anything else so that a missing
/// `kind` is always a violation, while an unknown `kind` with a well-formed
/// envelope is tolerated.
pub fn decode_request(value: &Value) -> Result<DecodedRequest, ProtocolViolation> {
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolViolation("frame is not a JSON object".to_string()))?;

    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolViolation("frame is missing the `kind` discriminator".to_string()))?
        .to_string();

    match serde_json::from_value::<RequestFrame>(value.clone()) {
        Ok(frame) => Ok(DecodedRequest::Known(frame)),
        Err(error) => {
            let correlation_id = object
                .get("correlation_id")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            if known_request_kind(&kind) {
                Err(ProtocolViolation(format!(
                    "malformed `{kind}` frame: {error}"
                )))
            } else {
                Ok(DecodedRequest::Unknown {
                    kind,
                    correlation_id,
                })
            }
        }
    }
}

fn known_request_kind(kind: &str) -> bool {
    matches!(
        kind,
        "list_agents"
            | "create_thread"
            | "add_participant"
            | "remove_participant"
            | "send_message"
            | "close_thread"
            | "wait_for_mentions"
    )
}

/// Decode a server push frame, tolerating unknown kinds and malformed data.
///
/// Returns `None` for anything unrecognized; the connection manager logs and
/// keeps reading rather than tearing the stream down.
pub fn decode_server_frame(data: &str) -> Option<ServerFrame> {
    serde_json::from_str::<ServerFrame>(data).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        decode_request, decode_server_frame, DecodedRequest, ErrorCode, ReplyFrame, RequestFrame,
        ServerFrame, ToolReply, ToolRequest, WireError, PROTOCOL_VERSION,
    };

    #[test]
    fn request_frame_round_trip() {
        let frame = RequestFrame::with_correlation(
            ToolRequest::SendMessage {
                thread_id: "thr_1".into(),
                body: "@media create a song about cake".into(),
                mentions: vec!["media".into()],
            },
            "req_1",
        );

        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["v"], 1);
        assert_eq!(encoded["kind"], "send_message");
        assert_eq!(encoded["correlation_id"], "req_1");

        let decoded: RequestFrame = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn reply_frame_round_trip() {
        let frame = ReplyFrame::new(
            Some("req_9".into()),
            ToolReply::Error(WireError {
                code: ErrorCode::TimeoutTooLarge,
                message: "timeout 120000ms exceeds maximum 60000ms".into(),
                retryable: false,
            }),
        );
        let encoded = serde_json::to_string(&frame).unwrap();
        let decoded: ReplyFrame = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn error_code_serializes_snake_case() {
        let encoded = serde_json::to_value(ErrorCode::MentionNotParticipant).unwrap();
        assert_eq!(encoded, json!("mention_not_participant"));
        assert_eq!(ErrorCode::WaitAlreadyActive.as_str(), "wait_already_active");
    }

    #[test]
    fn missing_discriminator_is_a_violation() {
        let frame = json!({"v": 1, "payload": {"timeout_ms": 1000}});
        let error = decode_request(&frame).unwrap_err();
        assert!(error.0.contains("kind"), "unexpected message: {}", error.0);
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let frame = json!({
            "v": 1,
            "kind": "set_status_emoji",
            "correlation_id": "req_5",
            "payload": {"emoji": ":crab:"}
        });
        match decode_request(&frame).unwrap() {
            DecodedRequest::Unknown {
                kind,
                correlation_id,
            } => {
                assert_eq!(kind, "set_status_emoji");
                assert_eq!(correlation_id.as_deref(), Some("req_5"));
            }
            other => panic!("expected unknown kind, got {other:?}"),
        }
    }

    #[test]
    fn malformed_known_kind_is_a_violation() {
        let frame = json!({
            "v": 1,
            "kind": "wait_for_mentions",
            "payload": {"timeout_ms": "soon"}
        });
        decode_request(&frame).unwrap_err();
    }

    #[test]
    fn request_without_correlation_id_decodes() {
        // Notification-style frames with no reply metadata must be routable.
        // Prior implementations rejected these; keep this as regression cover.
        let frame = json!({
            "v": 1,
            "kind": "list_agents",
            "payload": {"include_details": false}
        });
        match decode_request(&frame).unwrap() {
            DecodedRequest::Known(frame) => {
                assert_eq!(frame.correlation_id, None);
                assert_eq!(
                    frame.request,
                    ToolRequest::ListAgents {
                        include_details: false
                    }
                );
            }
            other => panic!("expected known frame, got {other:?}"),
        }
    }

    #[test]
    fn server_frames_route_without_correlation_id() {
        let heartbeat = r#"{"kind":"heartbeat","seq":7,"ts_ms":1700000000000}"#;
        assert_eq!(
            decode_server_frame(heartbeat),
            Some(ServerFrame::Heartbeat {
                seq: 7,
                ts_ms: 1_700_000_000_000
            })
        );

        let joined = r#"{"kind":"agent_joined","agent_id":"media"}"#;
        assert_eq!(
            decode_server_frame(joined),
            Some(ServerFrame::AgentJoined {
                agent_id: "media".into()
            })
        );
    }

    #[test]
    fn unknown_server_frame_is_ignored() {
        assert_eq!(decode_server_frame(r#"{"kind":"confetti"}"#), None);
        assert_eq!(decode_server_frame("not json"), None);
    }

    #[test]
    fn list_agents_defaults_include_details() {
        let frame: RequestFrame =
            serde_json::from_value(json!({"v": 1, "kind": "list_agents", "payload": {}})).unwrap();
        assert_eq!(
            frame.request,
            ToolRequest::ListAgents {
                include_details: false
            }
        );
    }

    #[test]
    fn version_constant_matches_wire() {
        let frame = RequestFrame::new(ToolRequest::CloseThread {
            thread_id: "thr_2".into(),
        });
        let encoded: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["v"], PROTOCOL_VERSION);
    }
}
