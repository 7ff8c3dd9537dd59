//! Error taxonomy for the relay, its connectors and the speech player.
//!
//! Every failure is scoped to one session or one utterance. Only start-up
//! errors (binding the listener, loading configuration) end the process.

use thiserror::Error;

/// Failure to establish an upstream connector.
///
/// Surfaced to the originating session as an `error` message. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The platform (or the connector sidecar) could not be reached.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),
    /// The channel exists but is not broadcasting right now.
    #[error("channel '{0}' is not live")]
    NotLive(String),
    /// The platform refused the connection because of rate limiting.
    #[error("rate limited by the platform")]
    RateLimited,
    /// The requested identifier cannot name a channel.
    #[error("invalid channel identifier '{0}'")]
    InvalidIdentifier(String),
    /// The connector answered with something other than a handshake.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failure while tearing a connector down. Logged, never surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("disconnect failed: {0}")]
    Transport(String),
}

/// Failure to voice one utterance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    /// The synthesizer process could not be started.
    #[error("could not start synthesizer '{program}': {detail}")]
    Spawn { program: String, detail: String },
    /// The synthesizer ran but reported failure.
    #[error("synthesizer failed: {0}")]
    Failed(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A client frame that is not a valid command.
    #[error("malformed client command: {0}")]
    CommandParse(#[from] serde_json::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Disconnect(#[from] DisconnectError),

    /// The client channel closed underneath the session.
    #[error("client channel closed")]
    TransportClosed,

    #[error(transparent)]
    SpeechSynthesis(#[from] SpeechError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<toml::de::Error> for RelayError {
    fn from(e: toml::de::Error) -> Self {
        RelayError::Config(e.to_string())
    }
}
