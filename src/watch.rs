//! Terminal clients of a running relay: `watch` and `status`.

use colored::*;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::cli::WatchArgs;
use crate::config::PresentationConfig;
use crate::error::RelayError;
use crate::events::{ClientCommand, ServerMessage};
use crate::presentation::{list_for, CardKind, Presentation};
use crate::speech::{CommandSynthesizer, SpeechPlayer, Voice};

/// A line typed on stdin while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinAction {
    ToggleSpeech,
    Clear,
    Quit,
}

impl StdinAction {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "s" | "speech" => Some(StdinAction::ToggleSpeech),
            "c" | "clear" => Some(StdinAction::Clear),
            "q" | "quit" | "exit" => Some(StdinAction::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "  commands: s = toggle speech, c = clear, q = quit";

/// Terminal line for a message that was just applied to `view`.
pub fn describe(message: &ServerMessage, view: &Presentation) -> Option<String> {
    if let Some(list) = list_for(message) {
        let card = view.list(list).front()?;
        let line = card.to_line();
        let colored = match card.kind {
            CardKind::Comment => line.normal(),
            CardKind::Gift => line.yellow(),
            CardKind::Like => line.magenta(),
            CardKind::Join => line.green(),
        };
        return Some(colored.to_string());
    }
    match message {
        ServerMessage::Status(_) | ServerMessage::StreamEnd(_) => {
            let text = format!("  {}", view.status_text());
            Some(if view.is_connected() {
                text.bright_green().to_string()
            } else {
                text.bright_red().to_string()
            })
        }
        ServerMessage::RoomStats(_) => view.stats().map(|s| {
            format!("  viewers {}  likes {}  diamonds {}", s.viewers, s.likes, s.diamonds)
                .bright_cyan()
                .to_string()
        }),
        _ => None,
    }
}

type WsWriter<S> = SplitSink<WebSocketStream<S>, WsMessage>;

async fn send_command<S>(write: &mut WsWriter<S>, command: &ClientCommand) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = serde_json::to_string(command)?;
    write.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Send `disconnect` and close; failures only matter for the log.
async fn hang_up<S>(write: &mut WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = send_command(write, &ClientCommand::Disconnect).await {
        debug!(error = %e, "disconnect not delivered");
    }
    if let Err(e) = write.close().await {
        debug!(error = %e, "close not delivered");
    }
}

/// Follow `args.username` through the relay at `args.url` until the user
/// quits or the relay goes away.
pub async fn watch(args: &WatchArgs, config: &PresentationConfig) -> Result<(), RelayError> {
    let (ws, _) = tokio_tungstenite::connect_async(args.url.as_str()).await?;
    let (mut write, mut read) = ws.split();
    send_command(
        &mut write,
        &ClientCommand::Connect {
            username: args.username.clone(),
        },
    )
    .await?;

    eprintln!("{}", format!("  Watching {} via {}", args.username, args.url).bright_blue());
    eprintln!("{}", HELP.dimmed());

    let mut view = Presentation::new(config.max_items);
    let synth = Arc::new(CommandSynthesizer::from_config(config));
    let (speech, speech_task) =
        SpeechPlayer::new(synth, Voice::from_config(config), config.speech_gap()).spawn();
    let mut speaking = args.speak;
    speech.set_enabled(speaking);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        let reaction = view.apply(&message);
                        if let Some(line) = describe(&message, &view) {
                            println!("{}", line);
                        }
                        if let Some(utterance) = reaction.utterance {
                            speech.say(utterance);
                        }
                        if let Some(alert) = reaction.alert {
                            eprintln!("{}", format!("  ! {}", alert).red().bold());
                        }
                    }
                    Err(e) => warn!(error = %e, "unparseable message from relay"),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    view.transport_closed();
                    eprintln!("{}", format!("  {}", view.status_text()).bright_red());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    view.transport_error();
                    eprintln!("{}", format!("  {}: {}", view.status_text(), e).bright_red());
                    break;
                }
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match StdinAction::parse(&line) {
                    Some(StdinAction::ToggleSpeech) => {
                        speaking = !speaking;
                        speech.set_enabled(speaking);
                        eprintln!("  speech {}", if speaking { "on" } else { "off" });
                    }
                    Some(StdinAction::Clear) => {
                        view.clear_all();
                        eprintln!("  cleared");
                    }
                    Some(StdinAction::Quit) => {
                        hang_up(&mut write).await;
                        break;
                    }
                    None if line.trim().is_empty() => {}
                    None => eprintln!("{}", HELP.dimmed()),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin unreadable");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                hang_up(&mut write).await;
                break;
            }
        }
    }

    speech.shutdown();
    if let Err(e) = speech_task.await {
        debug!(error = %e, "speech task ended abnormally");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,
    pub connections: usize,
}

pub fn status_url(base: &str) -> String {
    format!("{}/api/status", base.trim_end_matches('/'))
}

pub async fn query_status(base: &str) -> Result<StatusReport, RelayError> {
    let report = reqwest::get(status_url(base))
        .await?
        .error_for_status()?
        .json::<StatusReport>()
        .await?;
    Ok(report)
}
