//! End-to-end tests for the relay server: a real listener, real WebSocket
//! clients, and a scripted connector factory standing in for the platform.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use live_event_relay::connector::{Connector, ConnectorFactory, ConnectorHandle, EventSink, RoomInfo};
use live_event_relay::error::{ConnectionError, DisconnectError};
use live_event_relay::events::{ServerMessage, UpstreamEvent};
use live_event_relay::web::{serve_listener, AppState, StaticAssets};
use live_event_relay::{ConnectionRegistry, RelayContext};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Scripted upstream
// ---------------------------------------------------------------------------

struct Scripted {
    channel: String,
    disconnects: Arc<AtomicUsize>,
}

impl Connector for Scripted {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn connect(&self) -> BoxFuture<'_, Result<RoomInfo, ConnectionError>> {
        Box::pin(async move {
            if self.channel.starts_with("offline") {
                Err(ConnectionError::NotLive(self.channel.clone()))
            } else {
                Ok(Some(serde_json::json!({"roomId": format!("room-{}", self.channel)})))
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Remembers the sink of every connector it built so tests can push events.
#[derive(Default)]
struct ScriptedFactory {
    sinks: Mutex<HashMap<String, EventSink>>,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn emit(&self, channel: &str, event: serde_json::Value) {
        let event: UpstreamEvent = serde_json::from_value(event).unwrap();
        let sink = self.sinks.lock().unwrap().get(channel).cloned().unwrap();
        assert!(sink.emit(event));
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl ConnectorFactory for ScriptedFactory {
    fn create(&self, channel: &str, sink: EventSink) -> ConnectorHandle {
        self.sinks.lock().unwrap().insert(channel.to_string(), sink);
        Arc::new(Scripted {
            channel: channel.to_string(),
            disconnects: self.disconnects.clone(),
        })
    }
}

/// Connectors whose `connect()` blocks until the test opens the gate.
struct GatedFactory {
    gate: Arc<Semaphore>,
    disconnects: Arc<AtomicUsize>,
}

impl Default for GatedFactory {
    fn default() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            disconnects: Arc::default(),
        }
    }
}

struct Gated {
    channel: String,
    gate: Arc<Semaphore>,
    disconnects: Arc<AtomicUsize>,
}

impl Connector for Gated {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn connect(&self) -> BoxFuture<'_, Result<RoomInfo, ConnectionError>> {
        Box::pin(async move {
            self.gate.acquire().await.unwrap().forget();
            Ok(None)
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

impl GatedFactory {
    fn open(&self) {
        self.gate.add_permits(1);
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl ConnectorFactory for GatedFactory {
    fn create(&self, channel: &str, _sink: EventSink) -> ConnectorHandle {
        Arc::new(Gated {
            channel: channel.to_string(),
            gate: self.gate.clone(),
            disconnects: self.disconnects.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Relay<F = ScriptedFactory> {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    factory: Arc<F>,
}

async fn start() -> Relay {
    start_with(Arc::new(ScriptedFactory::default())).await
}

async fn start_with<F: ConnectorFactory + 'static>(factory: Arc<F>) -> Relay<F> {
    let registry = ConnectionRegistry::new();
    let state = AppState::new(
        RelayContext::new(registry.clone(), factory.clone()),
        StaticAssets::embedded(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_listener(listener, state));
    Relay {
        addr,
        registry,
        factory,
    }
}

impl<F> Relay<F> {
    async fn client(&self) -> Client {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", self.addr))
            .await
            .unwrap();
        assert_eq!(recv(&mut ws).await, ServerMessage::disconnected());
        ws
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn status(&self) -> serde_json::Value {
        reqwest::get(self.url("/api/status")).await.unwrap().json().await.unwrap()
    }

    async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..200 {
            if self.registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {} entries (has {})", expected, self.registry.len());
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay")
            .expect("relay closed the channel")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn connect_as(relay: &Relay, username: &str) -> Client {
    let mut ws = relay.client().await;
    send(&mut ws, &format!(r#"{{"command":"connect","username":"{}"}}"#, username)).await;
    ws
}

// ---------------------------------------------------------------------------
// WebSocket sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_with_marker_reports_canonical_name() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "@alice").await;

    match recv(&mut ws).await {
        ServerMessage::Status(s) => {
            assert!(s.connected);
            assert_eq!(s.username.as_deref(), Some("alice"));
            assert_eq!(s.room_info.unwrap()["roomId"], "room-alice");
        }
        other => panic!("expected status, got {:?}", other),
    }
    assert_eq!(relay.status().await, serde_json::json!({"status": "Online", "connections": 1}));
}

#[tokio::test]
async fn test_events_are_normalized_and_group_gifts_dropped() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "alice").await;
    recv(&mut ws).await;

    let f = &relay.factory;
    f.emit("alice", serde_json::json!({"event": "comment", "data": {
        "uniqueId": "bob", "nickname": "Bob", "comment": "<script>hi</script>"}}));
    f.emit("alice", serde_json::json!({"event": "gift", "data": {
        "uniqueId": "bob", "nickname": "Bob", "giftName": "Galaxy",
        "giftType": 1, "isGroupGift": true, "diamondCount": 1000, "repeatCount": 1}}));
    f.emit("alice", serde_json::json!({"event": "gift", "data": {
        "uniqueId": "bob", "nickname": "Bob", "giftName": "Heart",
        "giftType": 2, "isGroupGift": false, "diamondCount": 10, "repeatCount": 4}}));
    f.emit("alice", serde_json::json!({"event": "gift", "data": {
        "uniqueId": "bob", "nickname": "Bob", "giftName": "Rose",
        "giftType": 1, "isGroupGift": false, "diamondCount": 5, "repeatCount": 3}}));
    f.emit("alice", serde_json::json!({"event": "member", "data": {
        "uniqueId": "carol", "nickname": "Carol", "followInfo": {"followStatus": 1}}}));

    match recv(&mut ws).await {
        ServerMessage::Comment(c) => {
            assert_eq!(c.username, "bob");
            assert_eq!(c.display_name, "Bob");
            assert_eq!(c.comment, "<script>hi</script>");
            assert!(c.timestamp > 1_700_000_000_000);
        }
        other => panic!("expected comment, got {:?}", other),
    }
    match recv(&mut ws).await {
        ServerMessage::Gift(g) => {
            assert_eq!(g.gift_name, "Rose");
            assert_eq!(g.total_diamonds(), 15);
        }
        other => panic!("expected the discrete gift, got {:?}", other),
    }
    match recv(&mut ws).await {
        ServerMessage::Join(j) => {
            assert_eq!(j.username, "carol");
            assert_eq!(j.follow_role, Some(1));
        }
        other => panic!("expected join, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_end_and_room_stats_forwarded() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "alice").await;
    recv(&mut ws).await;

    relay.factory.emit("alice", serde_json::json!({"event": "roomUser", "data": {
        "viewerCount": 120, "likeCount": 3400, "diamondCount": 12}}));
    relay.factory.emit("alice", serde_json::json!({"event": "streamEnd", "data": {"reason": "host ended"}}));

    match recv(&mut ws).await {
        ServerMessage::RoomStats(s) => assert_eq!((s.viewer_count, s.like_count, s.diamond_count), (120, 3400, 12)),
        other => panic!("expected roomStats, got {:?}", other),
    }
    match recv(&mut ws).await {
        ServerMessage::StreamEnd(e) => assert_eq!(e.reason.as_deref(), Some("host ended")),
        other => panic!("expected streamEnd, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_command_tears_down_and_reports() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "alice").await;
    recv(&mut ws).await;

    send(&mut ws, r#"{"command":"disconnect"}"#).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::disconnected());
    assert_eq!(relay.registry.len(), 0);
    assert_eq!(relay.factory.disconnects(), 1);
}

#[tokio::test]
async fn test_disconnect_during_pending_connect_is_answered_at_once() {
    let relay = start_with(Arc::new(GatedFactory::default())).await;
    let mut ws = relay.client().await;
    send(&mut ws, r#"{"command":"connect","username":"alice"}"#).await;
    send(&mut ws, r#"{"command":"disconnect"}"#).await;

    // The connect is still parked on the gate.
    assert_eq!(recv(&mut ws).await, ServerMessage::disconnected());
    assert_eq!(relay.factory.disconnects(), 0);

    relay.factory.open();
    for _ in 0..200 {
        if relay.factory.disconnects() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.factory.disconnects(), 1);
    assert_eq!(relay.registry.len(), 0);
    assert_eq!(relay.status().await["connections"], 0);
}

#[tokio::test]
async fn test_channel_close_removes_registration() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "alice").await;
    recv(&mut ws).await;
    relay.wait_for_connections(1).await;

    ws.close(None).await.unwrap();
    relay.wait_for_connections(0).await;
    for _ in 0..200 {
        if relay.factory.disconnects() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.factory.disconnects(), 1);
}

#[tokio::test]
async fn test_malformed_command_keeps_channel_open() {
    let relay = start().await;
    let mut ws = relay.client().await;

    send(&mut ws, "not json").await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Error(_)));

    send(&mut ws, r#"{"command":"connect","username":"alice"}"#).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Status(s) if s.connected));
}

#[tokio::test]
async fn test_connect_failure_is_reported_as_error() {
    let relay = start().await;
    let mut ws = connect_as(&relay, "offline_dave").await;
    match recv(&mut ws).await {
        ServerMessage::Error(e) => assert_eq!(
            e.message,
            "Could not connect to @offline_dave: channel 'offline_dave' is not live"
        ),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(relay.registry.len(), 0);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let relay = start().await;
    let mut first = connect_as(&relay, "alice").await;
    recv(&mut first).await;
    let mut second = connect_as(&relay, "bob").await;
    recv(&mut second).await;
    assert_eq!(relay.registry.len(), 2);

    relay.factory.emit("bob", serde_json::json!({"event": "like", "data": {
        "uniqueId": "eve", "nickname": "Eve", "likeCount": 3, "totalLikeCount": 9}}));
    relay.factory.emit("alice", serde_json::json!({"event": "comment", "data": {
        "uniqueId": "frank", "nickname": "Frank", "comment": "for alice"}}));

    assert!(matches!(recv(&mut second).await, ServerMessage::Like(l) if l.total_like_count == 9));
    assert!(matches!(recv(&mut first).await, ServerMessage::Comment(c) if c.comment == "for alice"));
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_endpoint_with_no_sessions() {
    let relay = start().await;
    let resp = reqwest::get(relay.url("/api/status")).await.unwrap();
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": "Online", "connections": 0}));
}

#[tokio::test]
async fn test_index_page_is_served() {
    let relay = start().await;
    let resp = reqwest::get(relay.url("/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/html"));
    let body = resp.text().await.unwrap();
    assert!(body.contains("<title>Live Event Relay</title>"));
}

#[tokio::test]
async fn test_http_methods_and_unknown_paths() {
    let relay = start().await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, relay.url("/api/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 204);

    let post = client.post(relay.url("/api/status")).send().await.unwrap();
    assert_eq!(post.status(), 405);

    let missing = reqwest::get(relay.url("/missing.css")).await.unwrap();
    assert_eq!(missing.status(), 404);
}
