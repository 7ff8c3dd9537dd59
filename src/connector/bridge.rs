//! WebSocket client for a connector sidecar.
//!
//! The sidecar owns the platform's proprietary push protocol. For each
//! channel it accepts a WebSocket at `<base_url>/<channel>`, answers with one
//! handshake frame, then forwards every platform event as
//! `{"event": "<kind>", "data": {...}}` using the platform's field names.
//!
//! Handshake frames:
//! - `{"event":"connected","data":<roomInfo>}`
//! - `{"event":"error","data":{"message":"...","code":"notLive"}}`
//!   (`code` is one of `notLive`, `rateLimited`, `notFound`, or absent)

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{validate_channel, Connector, ConnectorFactory, ConnectorHandle, EventSink, RoomInfo};
use crate::error::{ConnectionError, DisconnectError};
use crate::events::{UpstreamError, UpstreamEvent};

type BridgeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum Handshake {
    Connected(serde_json::Value),
    Error(BridgeFailure),
}

#[derive(Debug, Deserialize)]
struct BridgeFailure {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl BridgeFailure {
    fn into_error(self, channel: &str) -> ConnectionError {
        match self.code.as_deref() {
            Some("notLive") => ConnectionError::NotLive(channel.to_string()),
            Some("rateLimited") => ConnectionError::RateLimited,
            Some("notFound") => ConnectionError::InvalidIdentifier(channel.to_string()),
            _ => ConnectionError::Unreachable(self.message),
        }
    }
}

/// Interpret the first text frame the sidecar sends.
fn parse_handshake(text: &str, channel: &str) -> Result<RoomInfo, ConnectionError> {
    let handshake: Handshake = serde_json::from_str(text)
        .map_err(|e| ConnectionError::Protocol(format!("bad handshake: {}", e)))?;
    match handshake {
        Handshake::Connected(serde_json::Value::Null) => Ok(None),
        Handshake::Connected(info) => Ok(Some(info)),
        Handshake::Error(failure) => Err(failure.into_error(channel)),
    }
}

#[derive(Default)]
struct BridgeState {
    writer: Option<SplitSink<BridgeStream, WsMessage>>,
    reader: Option<JoinHandle<()>>,
}

/// Connector that follows one channel through the sidecar.
pub struct BridgeConnector {
    channel: String,
    url: String,
    sink: EventSink,
    state: tokio::sync::Mutex<BridgeState>,
}

impl BridgeConnector {
    pub fn new(base_url: &str, channel: &str, sink: EventSink) -> Self {
        Self {
            channel: channel.to_string(),
            url: format!("{}/{}", base_url.trim_end_matches('/'), channel),
            sink,
            state: tokio::sync::Mutex::new(BridgeState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<RoomInfo, ConnectionError> {
        validate_channel(&self.channel)?;

        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        let (writer, mut reader) = ws.split();

        let room_info = loop {
            match reader.next().await {
                Some(Ok(WsMessage::Text(text))) => break parse_handshake(&text, &self.channel)?,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(ConnectionError::Unreachable(
                        "sidecar closed before handshake".to_string(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectionError::Unreachable(e.to_string())),
            }
        };

        let reader_task = tokio::spawn(forward_frames(
            reader,
            self.sink.clone(),
            self.channel.clone(),
        ));

        let mut state = self.state.lock().await;
        state.writer = Some(writer);
        state.reader = Some(reader_task);
        Ok(room_info)
    }

    async fn close(&self) -> Result<(), DisconnectError> {
        let (writer, reader) = {
            let mut state = self.state.lock().await;
            (state.writer.take(), state.reader.take())
        };
        if let Some(task) = reader {
            task.abort();
        }
        if let Some(mut writer) = writer {
            writer
                .send(WsMessage::Close(None))
                .await
                .map_err(|e| DisconnectError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

impl Connector for BridgeConnector {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn connect(&self) -> BoxFuture<'_, Result<RoomInfo, ConnectionError>> {
        Box::pin(self.open())
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        Box::pin(self.close())
    }
}

/// Forward sidecar frames to the sink until either side goes away.
async fn forward_frames(mut reader: SplitStream<BridgeStream>, sink: EventSink, channel: String) {
    let mut stream_ended = false;
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<UpstreamEvent>(&text) {
                Ok(event) => {
                    stream_ended = matches!(event, UpstreamEvent::StreamEnd(_));
                    if !sink.emit(event) {
                        return;
                    }
                }
                Err(e) => debug!(channel = %channel, error = %e, "skipping unrecognized sidecar frame"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %channel, error = %e, "sidecar stream failed");
                sink.emit(UpstreamEvent::Error(UpstreamError {
                    message: e.to_string(),
                }));
                return;
            }
        }
    }
    // A close after the stream ended is the expected shutdown.
    if stream_ended {
        debug!(channel = %channel, "sidecar closed after stream end");
        return;
    }
    sink.emit(UpstreamEvent::Error(UpstreamError {
        message: "sidecar closed the connection".to_string(),
    }));
}

/// Builds [`BridgeConnector`]s against one sidecar.
#[derive(Debug, Clone)]
pub struct BridgeFactory {
    base_url: String,
}

impl BridgeFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ConnectorFactory for BridgeFactory {
    fn create(&self, channel: &str, sink: EventSink) -> ConnectorHandle {
        Arc::new(BridgeConnector::new(&self.base_url, channel, sink))
    }
}
