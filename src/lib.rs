//! Live event relay.
//!
//! A WebSocket server that lets browser sessions follow a live-stream
//! channel. Each session asks for a channel, the relay opens an upstream
//! connector for it, and every comment, gift, like, join, room-stats update
//! and stream-end notice is normalized and forwarded to that session alone.
//!
//! The same crate ships the presentation model used by the browser client
//! and the terminal `watch` command, including a speech readout queue.

pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod presentation;
pub mod registry;
pub mod relay;
pub mod speech;
pub mod watch;
pub mod web;

pub use config::RelayConfig;
pub use error::{ConnectionError, DisconnectError, RelayError, SpeechError};
pub use events::{ClientCommand, ServerMessage, UpstreamEvent};
pub use registry::ConnectionRegistry;
pub use relay::{handle_session, RelayContext};
pub use web::{serve, serve_listener, AppState};
