//! Per-session relay: one WebSocket ↔ at most one upstream connector.
//!
//! ## Design
//! - The session task multiplexes three sources with `tokio::select!`:
//!   client frames, connector events, and settled connect attempts.
//! - `connect()` runs in a `JoinSet` owned by the session so a slow upstream
//!   never stalls the loop; a `disconnect` queued behind it is handled at once.
//! - Every connect/disconnect bumps the session's *generation*. Connector events
//!   and settled attempts carry the generation they were started under; stale
//!   ones are dropped (events) or torn down (connectors).
//! - The [`ConnectionRegistry`] is the only shared state. The session is the
//!   sole writer of its own entry.
//!
//! ## Lifecycle
//! 1. Channel opens → `status{connected:false}`
//! 2. `connect` → old connector torn down, new attempt spawned
//! 3. Attempt settles → registered + `status{connected:true}`, or `error`
//! 4. `disconnect` → connector torn down + `status{connected:false}`
//! 5. Channel closes → same teardown, nothing sent; in-flight attempts are
//!    drained in the background and disconnected if they succeed

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::connector::{ConnectorFactory, ConnectorHandle, EventSink, RoomInfo, TaggedEvent};
use crate::error::{ConnectionError, RelayError};
use crate::events::{canonical_channel, normalize, now_ms, ClientCommand, ServerMessage, UpstreamEvent};
use crate::registry::{new_session_id, ConnectionRegistry, SessionId};

/// Result of one spawned connect attempt.
pub type ConnectOutcome = (u64, String, ConnectorHandle, Result<RoomInfo, ConnectionError>);

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct RelayContext {
    pub registry: ConnectionRegistry,
    pub factory: Arc<dyn ConnectorFactory>,
}

impl RelayContext {
    pub fn new(registry: ConnectionRegistry, factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { registry, factory }
    }
}

/// Text of the `error` message sent when a connect attempt fails.
pub fn connect_failure_message(channel: &str, err: &ConnectionError) -> String {
    format!("Could not connect to @{}: {}", channel, err)
}

/// Disconnect a connector, logging instead of propagating failures.
async fn teardown(session: &str, handle: ConnectorHandle) {
    match handle.disconnect().await {
        Ok(()) => info!(session = %session, channel = %handle.channel(), "upstream disconnected"),
        Err(e) => {
            let err = RelayError::from(e);
            warn!(session = %session, channel = %handle.channel(), error = %err, "upstream disconnect failed");
        }
    }
}

/// Command-side state of one browser session.
pub struct Session {
    id: SessionId,
    ctx: RelayContext,
    events: mpsc::UnboundedSender<TaggedEvent>,
    generation: u64,
}

impl Session {
    pub fn new(ctx: RelayContext, events: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self {
            id: new_session_id(),
            ctx,
            events,
            generation: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle one text frame from the client. Returns the replies to send.
    pub async fn on_frame(&mut self, text: &str, attempts: &mut JoinSet<ConnectOutcome>) -> Vec<ServerMessage> {
        match ClientCommand::parse(text) {
            Ok(ClientCommand::Connect { username }) => self.on_connect(&username, attempts).await,
            Ok(ClientCommand::Disconnect) => self.on_disconnect().await,
            Err(e) => {
                let err = RelayError::from(e);
                warn!(session = %self.id, error = %err, "ignoring client frame");
                vec![ServerMessage::error(err.to_string())]
            }
        }
    }

    /// Start following `raw` (optionally `@`-prefixed). The attempt runs in
    /// `attempts`; its outcome arrives through [`Session::on_connect_settled`].
    pub async fn on_connect(&mut self, raw: &str, attempts: &mut JoinSet<ConnectOutcome>) -> Vec<ServerMessage> {
        self.generation += 1;
        let generation = self.generation;
        self.teardown_registered().await;

        let channel = canonical_channel(raw);
        if channel.is_empty() {
            let err = ConnectionError::InvalidIdentifier(raw.to_string());
            warn!(session = %self.id, error = %err, "rejecting connect");
            return vec![ServerMessage::error(connect_failure_message(&channel, &err))];
        }

        info!(session = %self.id, channel = %channel, generation, "connecting upstream");
        let sink = EventSink::new(generation, self.events.clone());
        let handle = self.ctx.factory.create(&channel, sink);
        attempts.spawn(async move {
            let result = handle.connect().await;
            (generation, channel, handle, result)
        });
        Vec::new()
    }

    /// Tear down the current connector (if any) and invalidate in-flight attempts.
    pub async fn on_disconnect(&mut self) -> Vec<ServerMessage> {
        self.generation += 1;
        self.teardown_registered().await;
        vec![ServerMessage::disconnected()]
    }

    /// A connect attempt finished.
    pub async fn on_connect_settled(&mut self, outcome: ConnectOutcome) -> Option<ServerMessage> {
        let (generation, channel, handle, result) = outcome;

        if generation != self.generation {
            if result.is_ok() {
                debug!(session = %self.id, channel = %channel, generation, "discarding superseded connector");
                teardown(&self.id, handle).await;
            }
            return None;
        }

        match result {
            Ok(room_info) => {
                if let Some(displaced) = self.ctx.registry.put(&self.id, handle) {
                    teardown(&self.id, displaced).await;
                }
                info!(session = %self.id, channel = %channel, "upstream connected");
                Some(ServerMessage::connected(channel, room_info))
            }
            Err(e) => {
                warn!(session = %self.id, channel = %channel, error = %e, "upstream connect failed");
                Some(ServerMessage::error(connect_failure_message(&channel, &e)))
            }
        }
    }

    /// Normalize one connector event, dropping events from superseded attempts.
    pub fn on_upstream_event(&self, generation: u64, event: UpstreamEvent) -> Option<ServerMessage> {
        if generation != self.generation {
            return None;
        }
        if let UpstreamEvent::Error(ref e) = event {
            error!(session = %self.id, message = %e.message, "upstream connector error");
        }
        normalize(event, now_ms())
    }

    /// The channel closed. Removes the registry entry synchronously and
    /// finishes teardown (including attempts still in flight) in the background.
    pub fn on_channel_close(self, mut attempts: JoinSet<ConnectOutcome>) {
        let registered = self.ctx.registry.remove(&self.id);
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Some(handle) = registered {
                teardown(&id, handle).await;
            }
            while let Some(joined) = attempts.join_next().await {
                if let Ok((_, _, handle, Ok(_))) = joined {
                    teardown(&id, handle).await;
                }
            }
        });
    }

    async fn teardown_registered(&mut self) {
        if let Some(handle) = self.ctx.registry.remove(&self.id) {
            teardown(&self.id, handle).await;
        }
    }
}

async fn send<S>(sink: &mut SplitSink<WebSocketStream<S>, WsMessage>, msg: &ServerMessage) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Ok(text) = msg.to_json() {
        sink.send(WsMessage::Text(text)).await?;
    }
    Ok(())
}

/// Drive one browser session until its channel closes.
pub async fn handle_session<S>(ws: WebSocketStream<S>, ctx: RelayContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaggedEvent>();
    let mut session = Session::new(ctx, event_tx);
    let mut attempts: JoinSet<ConnectOutcome> = JoinSet::new();
    let (mut ws_sink, mut ws_stream) = ws.split();

    info!(session = %session.id(), "client connected");

    let mut open = send(&mut ws_sink, &ServerMessage::disconnected()).await.is_ok();

    while open {
        let replies: Vec<ServerMessage> = tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => session.on_frame(&text, &mut attempts).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    debug!(session = %session.id(), error = %e, "client transport error");
                    break;
                }
            },
            Some((generation, event)) = event_rx.recv() => {
                session.on_upstream_event(generation, event).into_iter().collect()
            },
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => match joined {
                Ok(outcome) => session.on_connect_settled(outcome).await.into_iter().collect(),
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "connect task failed");
                    Vec::new()
                }
            },
        };

        for msg in &replies {
            if let Err(e) = send(&mut ws_sink, msg).await {
                debug!(session = %session.id(), error = %e, "dropping session after failed send");
                open = false;
                break;
            }
        }
    }

    info!(session = %session.id(), reason = %RelayError::TransportClosed, "client disconnected");
    session.on_channel_close(attempts);
}
