//! Full-stack tests: a real hub served over HTTP with real SSE client
//! runtimes attached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_hub::server::router;
use hub_core::{Hub, HubConfig};
use hubcast::{
    wait_for_session, AgentBrain, BrainError, ConnectionManager, DispatchLoop, HubClient,
    KeepaliveConfig, KeepaliveEngine, KeepaliveMode, MentionDelivery, OutboundAction,
    RuntimeConfig, RuntimeControl, ServerFrame, ToolSurface,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

async fn start_hub(config: HubConfig) -> (Arc<Hub>, String) {
    let hub = Hub::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral bind");
    let addr = listener.local_addr().expect("local addr");
    let app = router(hub.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (hub, format!("http://{addr}"))
}

struct TestAgent {
    client: Arc<HubClient>,
    frames: mpsc::Receiver<ServerFrame>,
    control_tx: mpsc::Sender<RuntimeControl>,
    connection: JoinHandle<()>,
}

impl TestAgent {
    async fn connect(base_url: &str, agent_id: &str) -> Self {
        let mut config = RuntimeConfig::new(agent_id);
        config.hub_url = base_url.to_string();
        config.agent_description = format!("{agent_id} test agent");
        config.reconnect_max_backoff_ms = 2_000;

        let (manager, mut session_rx) = ConnectionManager::new(config);
        let (frame_tx, frames) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::channel(1);
        let connection = tokio::spawn(async move { manager.run(frame_tx, control_rx).await });

        tokio::time::timeout(Duration::from_secs(5), wait_for_session(&mut session_rx))
            .await
            .expect("session open timed out")
            .expect("session open failed");

        let client = Arc::new(HubClient::new(base_url, session_rx));
        Self {
            client,
            frames,
            control_tx,
            connection,
        }
    }

    async fn disconnect(self) {
        let _ = self.control_tx.send(RuntimeControl::Shutdown).await;
        let _ = self.connection.await;
    }

    /// Read push frames until one matches, with a deadline.
    async fn expect_frame(
        &mut self,
        what: &str,
        matches: impl Fn(&ServerFrame) -> bool,
    ) -> ServerFrame {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = tokio::time::timeout(remaining, self.frames.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
                .unwrap_or_else(|| panic!("stream ended waiting for {what}"));
            if matches(&frame) {
                return frame;
            }
        }
    }
}

#[tokio::test]
async fn single_mention_end_to_end() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let coord = TestAgent::connect(&base_url, "coord").await;
    let media = TestAgent::connect(&base_url, "media").await;

    let thread_id = coord
        .client
        .create_thread("t1", &["coord".into(), "media".into()])
        .await
        .expect("create_thread");

    coord
        .client
        .send_message(&thread_id, "@media create a song about cake", &["media".into()])
        .await
        .expect("send_message");

    let batch = media
        .client
        .wait_for_mentions(8_000)
        .await
        .expect("wait_for_mentions");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].sender_id, "coord");
    assert_eq!(batch[0].thread_id, thread_id);

    coord.disconnect().await;
    media.disconnect().await;
}

#[tokio::test]
async fn empty_wait_returns_in_time_over_http() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let media = TestAgent::connect(&base_url, "media").await;

    let started = Instant::now();
    let batch = media.client.wait_for_mentions(1_000).await.expect("wait");
    let elapsed = started.elapsed();
    assert!(batch.is_empty());
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed < Duration::from_millis(2_000), "elapsed {elapsed:?}");

    media.disconnect().await;
}

#[tokio::test]
async fn timeout_ceiling_is_enforced_over_http() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let media = TestAgent::connect(&base_url, "media").await;

    let error = media
        .client
        .wait_for_mentions(120_000)
        .await
        .expect_err("must exceed the ceiling");
    assert!(error.is_timeout_too_large());

    // Clamped retry proceeds normally.
    let batch = media.client.wait_for_mentions(200).await.expect("wait");
    assert!(batch.is_empty());

    media.disconnect().await;
}

#[tokio::test]
async fn routing_is_by_agent_id_across_sessions() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let coord = TestAgent::connect(&base_url, "coord").await;
    let media = TestAgent::connect(&base_url, "media").await;

    let thread_id = coord
        .client
        .create_thread("t1", &["media".into()])
        .await
        .expect("create_thread");

    // media drops its transport entirely and comes back as a new session.
    media.disconnect().await;
    let media = TestAgent::connect(&base_url, "media").await;

    coord
        .client
        .send_message(&thread_id, "@media are you back?", &[])
        .await
        .expect("send after reconnect");

    let batch = media
        .client
        .wait_for_mentions(8_000)
        .await
        .expect("wait after reconnect");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].body, "@media are you back?");

    coord.disconnect().await;
    media.disconnect().await;
}

#[tokio::test]
async fn displacement_notice_reaches_the_old_session() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let mut first = TestAgent::connect(&base_url, "media").await;
    let second = TestAgent::connect(&base_url, "media").await;

    first
        .expect_frame("displacement notice", |frame| {
            matches!(frame, ServerFrame::Displaced { .. })
        })
        .await;

    // Stop the displaced runtime before its reconnect would displace back.
    first.disconnect().await;

    // The surviving session keeps working.
    let agents = second.client.list_agents(false).await.expect("list");
    assert_eq!(agents.len(), 1);
    second.disconnect().await;
}

#[tokio::test]
async fn connection_manager_reconnects_on_its_own() {
    let (hub, base_url) = start_hub(HubConfig::default()).await;
    let mut first = TestAgent::connect(&base_url, "media").await;

    // Force a transport drop by displacing the session, then bow the
    // displacing session out so the reconnect can win the id back.
    let second = TestAgent::connect(&base_url, "media").await;
    first
        .expect_frame("displacement notice", |frame| {
            matches!(frame, ServerFrame::Displaced { .. })
        })
        .await;
    second.disconnect().await;

    // The manager backs off and reopens with the same agent id.
    first
        .expect_frame("re-established session", |frame| {
            matches!(frame, ServerFrame::SessionOpened { .. })
        })
        .await;
    let agents = first.client.list_agents(false).await.expect("list");
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].agent_id, "media");
    assert!(hub.registry().is_registered("media"));

    first.disconnect().await;
}

#[tokio::test]
async fn registry_notices_are_plain_notifications() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let mut coord = TestAgent::connect(&base_url, "coord").await;
    let media = TestAgent::connect(&base_url, "media").await;

    // No correlation id on these frames; they must still route.
    let frame = coord
        .expect_frame("agent_joined notice", |frame| {
            matches!(frame, ServerFrame::AgentJoined { agent_id } if agent_id == "media")
        })
        .await;
    assert!(matches!(frame, ServerFrame::AgentJoined { .. }));

    coord.disconnect().await;
    media.disconnect().await;
}

#[tokio::test]
async fn keepalive_pings_keep_the_session_active() {
    let (hub, base_url) = start_hub(HubConfig::default()).await;
    let media = TestAgent::connect(&base_url, "media").await;

    let keepalive = KeepaliveEngine::new(
        media.client.clone(),
        KeepaliveConfig {
            mode: KeepaliveMode::Active,
            ping_interval_ms: 100,
        },
    );
    let (control_tx, control_rx) = mpsc::channel(1);
    let engine = tokio::spawn(keepalive.run(control_rx));

    let before = hub.registry().list(true)[0]
        .details
        .as_ref()
        .unwrap()
        .last_activity_at;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let details_after = hub.registry().list(true)[0].details.clone().unwrap();

    assert!(details_after.last_activity_at > before, "pings count as activity");
    assert!(details_after.connected, "session stayed alive");

    let _ = control_tx.send(RuntimeControl::Shutdown).await;
    let _ = engine.await;
    media.disconnect().await;
}

#[tokio::test]
async fn dispatch_loop_cost_gate_and_reply_end_to_end() {
    let (_hub, base_url) = start_hub(HubConfig::default()).await;
    let coord = TestAgent::connect(&base_url, "coord").await;
    let media = TestAgent::connect(&base_url, "media").await;

    struct GateBrain {
        invocations: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl AgentBrain for GateBrain {
        async fn handle(
            &self,
            batch: &[MentionDelivery],
        ) -> Result<Vec<OutboundAction>, BrainError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(vec![OutboundAction::SendMessage {
                thread_id: batch[0].thread_id.clone(),
                body: format!("@{} done", batch[0].sender_id),
                mentions: vec![batch[0].sender_id.clone()],
            }])
        }
    }

    let invocations = Arc::new(AtomicU64::new(0));
    let dispatch = DispatchLoop::new(
        media.client.clone(),
        GateBrain {
            invocations: invocations.clone(),
        },
        500,
        50,
    );
    let (control_tx, control_rx) = mpsc::channel(1);
    let loop_task = tokio::spawn(dispatch.run(control_rx));

    // Several empty waits pass; the brain must not run.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0, "cost gate violated");

    let thread_id = coord
        .client
        .create_thread("t1", &["media".into()])
        .await
        .expect("create_thread");
    coord
        .client
        .send_message(&thread_id, "@media one job", &[])
        .await
        .expect("send");

    // The mention wakes the loop, the brain runs once, and its reply lands
    // back in the thread.
    let reply = coord
        .client
        .wait_for_mentions(8_000)
        .await
        .expect("coord wait for reply");
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].sender_id, "media");
    assert!(reply[0].body.contains("done"));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let _ = control_tx.send(RuntimeControl::Shutdown).await;
    let _ = loop_task.await;
    coord.disconnect().await;
    media.disconnect().await;
}

#[tokio::test]
async fn mention_not_participant_rejected_end_to_end() {
    let (hub, base_url) = start_hub(HubConfig::default()).await;
    let coord = TestAgent::connect(&base_url, "coord").await;
    let media = TestAgent::connect(&base_url, "media").await;
    let news = TestAgent::connect(&base_url, "news").await;

    let thread_id = coord
        .client
        .create_thread("t2", &["media".into()])
        .await
        .expect("create_thread");

    let error = coord
        .client
        .send_message(&thread_id, "@news headlines", &["news".into()])
        .await
        .expect_err("news is not a participant");
    assert_eq!(
        error.code(),
        Some(hubcast::ErrorCode::MentionNotParticipant)
    );
    assert_eq!(hub.threads().messages(&thread_id).unwrap().len(), 0);

    coord.disconnect().await;
    media.disconnect().await;
    news.disconnect().await;
}
