use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::UpstreamKind;

#[derive(Parser)]
#[command(name = "live-event-relay")]
#[command(version)]
#[command(about = "Relay live-stream events to browser sessions over WebSocket")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "live_event_relay=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Flags for the default `serve` command
    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Args {
    /// The command to run; `serve` when none was given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server (the default)
    Serve(ServeArgs),
    /// Follow a channel from the terminal through a running relay
    Watch(WatchArgs),
    /// Query a running relay's status endpoint
    Status(StatusArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(ClapArgs, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Listening port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Listening address
    #[arg(long)]
    pub host: Option<String>,

    /// Directory with the browser client's assets
    #[arg(long)]
    pub public_dir: Option<PathBuf>,

    /// Upstream connector backend
    #[arg(long, value_enum)]
    pub upstream: Option<UpstreamKind>,

    /// Base WebSocket URL of the connector sidecar
    #[arg(long)]
    pub bridge_url: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WatchArgs {
    /// Channel to follow (a leading @ is accepted)
    pub username: String,

    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:3000")]
    pub url: String,

    /// Read comments, gifts and joins aloud
    #[arg(long)]
    pub speak: bool,

    /// Entries kept per list
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Pause between utterances in milliseconds
    #[arg(long)]
    pub speech_gap_ms: Option<u64>,

    /// Speech volume, 0.0 to 1.0
    #[arg(long)]
    pub volume: Option<f32>,

    /// Speech rate, 1.0 is normal
    #[arg(long)]
    pub rate: Option<f32>,

    /// Text-to-speech program
    #[arg(long)]
    pub tts_program: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Relay HTTP base URL
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub url: String,
}
