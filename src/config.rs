//! Runtime configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags (see [`crate::cli`]). Every field has a default, so an
//! empty file (or no file) is a valid configuration.
//!
//! ```toml
//! port = 3000
//! public_dir = "public"
//!
//! [upstream]
//! kind = "bridge"
//! bridge_url = "ws://127.0.0.1:8081/live"
//!
//! [presentation]
//! max_items = 50
//! speech_gap_ms = 300
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{ServeArgs, WatchArgs};
use crate::connector::simulated::SimulationSettings;
use crate::error::RelayError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default cap on each rendered event list.
pub const DEFAULT_MAX_ITEMS: usize = 50;
/// Default pause between two spoken utterances.
pub const DEFAULT_SPEECH_GAP_MS: u64 = 300;

/// Which upstream connector backend the relay builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    /// WebSocket connector sidecar.
    #[default]
    Bridge,
    /// In-process random event generator.
    Simulated,
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamKind::Bridge => write!(f, "bridge"),
            UpstreamKind::Simulated => write!(f, "simulated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub kind: UpstreamKind,
    /// Base URL of the connector sidecar; the channel name is appended.
    pub bridge_url: String,
    pub simulated_interval_ms: u64,
    pub simulated_latency_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            kind: UpstreamKind::Bridge,
            bridge_url: "ws://127.0.0.1:8081/live".to_string(),
            simulated_interval_ms: 900,
            simulated_latency_ms: 250,
        }
    }
}

impl UpstreamConfig {
    pub fn simulation(&self) -> SimulationSettings {
        SimulationSettings {
            connect_latency: Duration::from_millis(self.simulated_latency_ms),
            event_interval: Duration::from_millis(self.simulated_interval_ms.max(1)),
        }
    }
}

/// Presentation-client defaults (terminal client and speech player).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    pub max_items: usize,
    pub speech_gap_ms: u64,
    /// 0.0 to 1.0
    pub volume: f32,
    /// 1.0 is the synthesizer's normal speed.
    pub rate: f32,
    pub language: String,
    pub tts_program: String,
    /// Argument template; see [`crate::speech::CommandSynthesizer`].
    pub tts_args: Vec<String>,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            speech_gap_ms: DEFAULT_SPEECH_GAP_MS,
            volume: 1.0,
            rate: 1.0,
            language: "en-US".to_string(),
            tts_program: "espeak-ng".to_string(),
            tts_args: ["-a", "{volume_pct}", "-s", "{wpm}", "{text}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PresentationConfig {
    pub fn speech_gap(&self) -> Duration {
        Duration::from_millis(self.speech_gap_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the browser client's assets. Embedded copies are served
    /// for anything missing from it.
    pub public_dir: Option<PathBuf>,
    pub upstream: UpstreamConfig,
    pub presentation: PresentationConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            public_dir: Some(PathBuf::from("public")),
            upstream: UpstreamConfig::default(),
            presentation: PresentationConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, RelayError> {
        let config: RelayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|e| RelayError::Config(format!("{}: {}", p.display(), e)))?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.presentation.max_items == 0 {
            return Err(RelayError::Config("presentation.max_items must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.presentation.volume) {
            return Err(RelayError::Config("presentation.volume must be within 0.0..=1.0".into()));
        }
        if self.presentation.rate <= 0.0 {
            return Err(RelayError::Config("presentation.rate must be positive".into()));
        }
        if self.upstream.kind == UpstreamKind::Bridge
            && !(self.upstream.bridge_url.starts_with("ws://") || self.upstream.bridge_url.starts_with("wss://"))
        {
            return Err(RelayError::Config(format!(
                "upstream.bridge_url must be a ws:// or wss:// URL, got '{}'",
                self.upstream.bridge_url
            )));
        }
        Ok(())
    }

    /// Apply `serve` flags on top of the file settings.
    pub fn apply_serve(&mut self, args: &ServeArgs) -> Result<(), RelayError> {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(dir) = &args.public_dir {
            self.public_dir = Some(dir.clone());
        }
        if let Some(kind) = args.upstream {
            self.upstream.kind = kind;
        }
        if let Some(url) = &args.bridge_url {
            self.upstream.bridge_url = url.clone();
        }
        self.validate()
    }

    /// Apply `watch` flags on top of the file settings.
    pub fn apply_watch(&mut self, args: &WatchArgs) -> Result<(), RelayError> {
        let p = &mut self.presentation;
        if let Some(n) = args.max_items {
            p.max_items = n;
        }
        if let Some(gap) = args.speech_gap_ms {
            p.speech_gap_ms = gap;
        }
        if let Some(v) = args.volume {
            p.volume = v;
        }
        if let Some(r) = args.rate {
            p.rate = r;
        }
        if let Some(program) = &args.tts_program {
            p.tts_program = program.clone();
        }
        self.validate()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
