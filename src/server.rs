//! HTTP transport for the Hub: the SSE push channel plus the short POST
//! operations, wired onto an axum router.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{routing, Json, Router};
use futures_util::Stream;
use hub_core::Hub;
use hubcast::protocol::ServerFrame;
use hubcast::types::SessionHandshake;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
}

pub fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", routing::get(health))
        .route("/sse", routing::get(open_sse))
        .route("/api/sessions/{session_id}/rpc", routing::post(session_rpc))
        .with_state(AppState { hub })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "agent-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.hub.uptime_secs(),
        "agentCount": state.hub.registry().len(),
    }))
}

/// Session open: the identity handshake arrives as query parameters and the
/// response is the durable push channel. The first frame announces the
/// session id; a heartbeat pump keeps the channel hot from the server side.
async fn open_sse(
    State(state): State<AppState>,
    Query(handshake): Query<SessionHandshake>,
) -> Sse<axum::response::sse::KeepAliveStream<SessionStream>> {
    let (session_id, frames) = state.hub.open_session(&handshake);

    let hub = state.hub.clone();
    let pump_session = session_id.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(hub.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        let mut seq = 0u64;
        loop {
            ticker.tick().await;
            seq += 1;
            if !hub.send_heartbeat(&pump_session, seq) {
                break;
            }
        }
    });

    let stream = SessionStream {
        inner: ReceiverStream::new(frames),
        hub: state.hub.clone(),
        session_id,
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// The push channel as an SSE body. Ends when the Hub drops the session's
/// sender (close, displacement, eviction, backpressure); dropping from the
/// client side marks the session disconnected so the grace window starts.
pub struct SessionStream {
    inner: ReceiverStream<ServerFrame>,
    hub: Arc<Hub>,
    session_id: String,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(to_sse_event(&frame)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.hub.close_session(&self.session_id, "transport_closed");
    }
}

fn to_sse_event(frame: &ServerFrame) -> Event {
    Event::default()
        .json_data(frame)
        .unwrap_or_else(|error| {
            tracing::warn!(target = "agent_hub::server", error = %error, "frame serialization failed");
            Event::default().data("{}")
        })
}

async fn session_rpc(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(frame): Json<Value>,
) -> Response {
    match state.hub.handle_rpc(&session_id, &frame).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(violation) => {
            tracing::warn!(
                target = "agent_hub::server",
                session_id = %session_id,
                error = %violation,
                "terminating session on protocol violation"
            );
            state.hub.close_session(&session_id, "protocol_error");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "v": 1,
                    "kind": "error",
                    "payload": {
                        "code": "protocol_error",
                        "message": violation.to_string(),
                        "retryable": false,
                    }
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use hub_core::{Hub, HubConfig};
    use hubcast::types::SessionHandshake;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    fn handshake(agent_id: &str) -> SessionHandshake {
        SessionHandshake {
            agent_id: agent_id.to_string(),
            agent_description: String::new(),
            capabilities: None,
            wait_for_agents: 0,
            application_id: "app".to_string(),
            privacy_key: "key".to_string(),
        }
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        serde_json::from_slice(&body).expect("response body should be json")
    }

    #[tokio::test]
    async fn health_reports_agent_count() {
        let hub = Hub::new(HubConfig::default());
        hub.open_session(&handshake("media"));
        let response = router(hub)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["service"], "agent-hub");
        assert_eq!(body["agentCount"], 1);
    }

    #[tokio::test]
    async fn rpc_round_trips_through_the_router() {
        let hub = Hub::new(HubConfig::default());
        let (session_id, _frames) = hub.open_session(&handshake("media"));

        let response = router(hub)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{session_id}/rpc"))
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"v": 1, "kind": "list_agents", "payload": {}}).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["kind"], "agents");
        assert_eq!(body["payload"]["agents"][0]["agent_id"], "media");
    }

    #[tokio::test]
    async fn protocol_violation_terminates_the_session() {
        let hub = Hub::new(HubConfig::default());
        let (session_id, _frames) = hub.open_session(&handshake("media"));

        let app = router(hub.clone());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{session_id}/rpc"))
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"v": 1, "payload": {}}).to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_json(response).await;
        assert_eq!(body["payload"]["code"], "protocol_error");

        // The session is gone; further ops are rejected as unknown_session.
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{session_id}/rpc"))
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"v": 1, "kind": "list_agents", "payload": {}}).to_string(),
                    ))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let body = response_json(response).await;
        assert_eq!(body["kind"], "error");
        assert_eq!(body["payload"]["code"], "unknown_session");
    }
}
