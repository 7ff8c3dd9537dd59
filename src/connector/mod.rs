//! # Upstream connectors
//!
//! A connector follows one live channel on the platform and emits the fixed
//! set of [`UpstreamEvent`] kinds into an [`EventSink`]. The relay treats it as
//! a black box: build it from a canonical channel name, `connect()`, listen,
//! `disconnect()`.
//!
//! ## Backends
//!
//! - [`bridge::BridgeConnector`]: WebSocket client to a connector sidecar that
//!   decodes the platform's push protocol and forwards one JSON frame per event.
//! - [`simulated::SimulatedConnector`]: in-process random event generator for
//!   demos and local development.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = factory.create("alice", EventSink::new(1, tx));
//! let room_info = handle.connect().await?;
//! while let Some((generation, event)) = rx.recv().await { /* ... */ }
//! handle.disconnect().await?;
//! ```

pub mod bridge;
pub mod simulated;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::config::{UpstreamConfig, UpstreamKind};
use crate::error::{ConnectionError, DisconnectError};
use crate::events::UpstreamEvent;

pub use bridge::{BridgeConnector, BridgeFactory};
pub use simulated::{SimulatedConnector, SimulatedFactory};

/// Room metadata returned by a successful connect, forwarded verbatim.
pub type RoomInfo = Option<serde_json::Value>;

/// Shared handle to a live connector.
pub type ConnectorHandle = Arc<dyn Connector>;

/// Events tagged with the connect attempt that produced them.
pub type TaggedEvent = (u64, UpstreamEvent);

/// Where a connector delivers its events.
///
/// Every event is tagged with the attempt generation the sink was created
/// for, so the session can discard events from superseded connectors.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver one event. Returns `false` once the session is gone.
    pub fn emit(&self, event: UpstreamEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One upstream connection to a live channel.
///
/// Implementations emit events from a single task so that delivery order
/// matches the order the platform produced them.
pub trait Connector: Send + Sync {
    /// Canonical channel name this connector follows.
    fn channel(&self) -> &str;

    /// Establish the upstream connection. Resolves with the room metadata
    /// the platform supplies.
    fn connect(&self) -> BoxFuture<'_, Result<RoomInfo, ConnectionError>>;

    /// Tear the connection down. Must be safe to call more than once and
    /// on a connector that never connected.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>>;
}

/// Builds connectors for the relay.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, channel: &str, sink: EventSink) -> ConnectorHandle;
}

/// Factory for the configured backend.
pub fn factory_for(config: &UpstreamConfig) -> Arc<dyn ConnectorFactory> {
    match config.kind {
        UpstreamKind::Bridge => Arc::new(BridgeFactory::new(config.bridge_url.clone())),
        UpstreamKind::Simulated => Arc::new(SimulatedFactory::new(config.simulation())),
    }
}

/// Reject identifiers that cannot name a platform channel.
///
/// Channel names are ASCII letters, digits, `_` and `.`; anything else
/// (including an empty name) fails with [`ConnectionError::InvalidIdentifier`].
pub fn validate_channel(channel: &str) -> Result<(), ConnectionError> {
    let valid = !channel.is_empty()
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ConnectionError::InvalidIdentifier(channel.to_string()))
    }
}
