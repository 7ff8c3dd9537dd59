//! Speech output queue.
//!
//! Utterances are voiced one at a time, in arrival order, with a fixed pause
//! after each. [`SpeechQueue`] is the bookkeeping (pending FIFO, idle or
//! speaking, enabled flag); [`SpeechPlayer`] drives it from a single task so
//! that cancelling speech is just dropping the in-flight playback future.

use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PresentationConfig;
use crate::error::SpeechError;
use crate::presentation::SPEECH_ENABLED_TEXT;

/// Nominal words per minute at rate 1.0, used for the `{wpm}` placeholder.
const BASE_WPM: f32 = 175.0;

/// One line to voice plus the voice settings in effect.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
    /// 0.0 to 1.0
    pub volume: f32,
    /// 1.0 is normal speed.
    pub rate: f32,
}

/// Voice settings shared by every utterance of a player.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub language: String,
    pub volume: f32,
    pub rate: f32,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            volume: 1.0,
            rate: 1.0,
        }
    }
}

impl Voice {
    pub fn from_config(config: &PresentationConfig) -> Self {
        Self {
            language: config.language.clone(),
            volume: config.volume,
            rate: config.rate,
        }
    }

    fn utterance(&self, text: String) -> Utterance {
        Utterance {
            text,
            language: self.language.clone(),
            volume: self.volume,
            rate: self.rate,
        }
    }
}

/// Something that can voice an utterance.
///
/// The returned future resolves when playback ends. Dropping it must stop
/// playback.
pub trait Synthesizer: Send + Sync + 'static {
    fn speak(&self, utterance: Utterance) -> BoxFuture<'static, Result<(), SpeechError>>;
}

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Speaking,
}

/// FIFO of pending utterances with an explicit playback state.
#[derive(Debug, Default)]
pub struct SpeechQueue {
    pending: VecDeque<String>,
    state: PlaybackState,
    enabled: bool,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue `text`. Returns the utterance to start right away when idle.
    ///
    /// Ignored while disabled.
    pub fn enqueue(&mut self, text: String) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.pending.push_back(text);
        match self.state {
            PlaybackState::Idle => self.advance(),
            PlaybackState::Speaking => None,
        }
    }

    /// The current utterance and its trailing gap are over.
    ///
    /// Returns the next utterance, or goes idle.
    pub fn finished(&mut self) -> Option<String> {
        self.advance()
    }

    /// Turning speech off discards everything queued and goes idle.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.pending.clear();
            self.state = PlaybackState::Idle;
        }
    }

    fn advance(&mut self) -> Option<String> {
        if !self.enabled {
            self.state = PlaybackState::Idle;
            return None;
        }
        match self.pending.pop_front() {
            Some(next) => {
                self.state = PlaybackState::Speaking;
                Some(next)
            }
            None => {
                self.state = PlaybackState::Idle;
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Player task
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SpeechCommand {
    Say(String),
    SetEnabled(bool),
    Shutdown,
}

/// Cheap handle to a running [`SpeechPlayer`].
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    tx: mpsc::UnboundedSender<SpeechCommand>,
}

impl SpeechHandle {
    pub fn say(&self, text: impl Into<String>) {
        let _ = self.tx.send(SpeechCommand::Say(text.into()));
    }

    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.tx.send(SpeechCommand::SetEnabled(enabled));
    }

    /// Stop the player, cutting off anything being spoken.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SpeechCommand::Shutdown);
    }
}

pub struct SpeechPlayer {
    synth: Arc<dyn Synthesizer>,
    voice: Voice,
    gap: Duration,
}

impl SpeechPlayer {
    pub fn new(synth: Arc<dyn Synthesizer>, voice: Voice, gap: Duration) -> Self {
        Self { synth, voice, gap }
    }

    /// Start the player task. Speech starts disabled.
    pub fn spawn(self) -> (SpeechHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (SpeechHandle { tx }, task)
    }

    fn play(&self, text: String) -> BoxFuture<'static, ()> {
        let synth = Arc::clone(&self.synth);
        let utterance = self.voice.utterance(text);
        let gap = self.gap;
        Box::pin(async move {
            debug!(text = %utterance.text, "speaking");
            if let Err(e) = synth.speak(utterance).await {
                warn!(error = %e, "speech synthesis failed");
            }
            tokio::time::sleep(gap).await;
        })
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<SpeechCommand>) {
        let mut queue = SpeechQueue::new();
        let mut current: Option<BoxFuture<'static, ()>> = None;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(SpeechCommand::Say(text)) => {
                        if let Some(next) = queue.enqueue(text) {
                            current = Some(self.play(next));
                        }
                    }
                    Some(SpeechCommand::SetEnabled(enabled)) => {
                        if enabled == queue.is_enabled() {
                            continue;
                        }
                        if !enabled {
                            current = None;
                        }
                        queue.set_enabled(enabled);
                        if enabled {
                            if let Some(next) = queue.enqueue(SPEECH_ENABLED_TEXT.to_string()) {
                                current = Some(self.play(next));
                            }
                        }
                    }
                    Some(SpeechCommand::Shutdown) | None => break,
                },
                _ = wait_playback(&mut current) => {
                    current = queue.finished().map(|next| self.play(next));
                }
            }
        }
    }
}

/// Resolve when the in-flight playback (speech plus gap) completes; never
/// resolves when nothing is playing.
async fn wait_playback(current: &mut Option<BoxFuture<'static, ()>>) {
    match current.as_mut() {
        Some(playback) => playback.await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// External command synthesizer
// ---------------------------------------------------------------------------

/// Voices utterances by running a text-to-speech program.
///
/// Each argument template entry may contain these placeholders:
///
/// | placeholder    | value                                  |
/// |----------------|----------------------------------------|
/// | `{text}`       | the utterance                          |
/// | `{lang}`       | language tag, e.g. `en-US`             |
/// | `{volume}`     | 0.0 to 1.0                             |
/// | `{volume_pct}` | 0 to 100 (rounded)                     |
/// | `{rate}`       | rate multiplier                        |
/// | `{wpm}`        | words per minute, 175 at rate 1.0      |
///
/// The child process is killed if playback is cancelled.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &PresentationConfig) -> Self {
        Self::new(config.tts_program.clone(), config.tts_args.clone())
    }

    pub fn render_args(&self, utterance: &Utterance) -> Vec<String> {
        let volume_pct = (utterance.volume.clamp(0.0, 1.0) * 100.0).round() as u32;
        let wpm = (utterance.rate * BASE_WPM).round().max(1.0) as u32;
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{text}", &utterance.text)
                    .replace("{lang}", &utterance.language)
                    .replace("{volume_pct}", &volume_pct.to_string())
                    .replace("{volume}", &utterance.volume.to_string())
                    .replace("{rate}", &utterance.rate.to_string())
                    .replace("{wpm}", &wpm.to_string())
            })
            .collect()
    }
}

impl Synthesizer for CommandSynthesizer {
    fn speak(&self, utterance: Utterance) -> BoxFuture<'static, Result<(), SpeechError>> {
        let program = self.program.clone();
        let args = self.render_args(&utterance);
        Box::pin(async move {
            let output = tokio::process::Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| SpeechError::Spawn {
                    program: program.clone(),
                    detail: e.to_string(),
                })?;
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(SpeechError::Failed(format!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    stderr.trim()
                )))
            }
        })
    }
}
