//! Presentation client model.
//!
//! Holds what a viewer of the relay sees: connection state and status line,
//! the three bounded event lists, and the stats panel. [`Presentation::apply`]
//! consumes one [`ServerMessage`] and reports what the front end should do
//! beyond re-rendering (speak a line, raise an alert). The browser client in
//! `public/app.js` and the terminal `watch` command both follow this model.

mod feed;
mod render;

pub use feed::BoundedFeed;
pub use render::{escape_html, format_clock, format_count, CardKind, EventCard};

use crate::config::DEFAULT_MAX_ITEMS;
use crate::events::{RoomStatsEvent, ServerMessage};

/// Spoken once when speech readout is switched on.
pub const SPEECH_ENABLED_TEXT: &str = "Speech readout enabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Formatted stats panel values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsView {
    pub viewers: String,
    pub likes: String,
    pub diamonds: String,
}

impl From<&RoomStatsEvent> for StatsView {
    fn from(s: &RoomStatsEvent) -> Self {
        Self {
            viewers: format_count(s.viewer_count),
            likes: format_count(s.like_count),
            diamonds: format_count(s.diamond_count),
        }
    }
}

/// Side effects requested by one applied message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// Text for the speech queue; the queue ignores it while speech is off.
    pub utterance: Option<String>,
    pub alert: Option<String>,
}

/// Which list a card landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Comments,
    Gifts,
    Other,
}

#[derive(Debug, Clone)]
pub struct Presentation {
    state: ConnectionState,
    status_text: String,
    stats: Option<StatsView>,
    comments: BoundedFeed<EventCard>,
    gifts: BoundedFeed<EventCard>,
    other: BoundedFeed<EventCard>,
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS)
    }
}

impl Presentation {
    pub fn new(max_items: usize) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            status_text: "Disconnected".to_string(),
            stats: None,
            comments: BoundedFeed::new(max_items),
            gifts: BoundedFeed::new(max_items),
            other: BoundedFeed::new(max_items),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Whether the stats panel is shown.
    pub fn stats_visible(&self) -> bool {
        self.is_connected()
    }

    /// Latest stats, or `None` while the panel is hidden or nothing arrived yet.
    pub fn stats(&self) -> Option<&StatsView> {
        if self.stats_visible() {
            self.stats.as_ref()
        } else {
            None
        }
    }

    pub fn list(&self, kind: ListKind) -> &BoundedFeed<EventCard> {
        match kind {
            ListKind::Comments => &self.comments,
            ListKind::Gifts => &self.gifts,
            ListKind::Other => &self.other,
        }
    }

    /// Apply one message from the relay.
    pub fn apply(&mut self, message: &ServerMessage) -> Reaction {
        let mut reaction = Reaction::default();
        match message {
            ServerMessage::Status(s) => {
                if s.connected {
                    let name = s.username.as_deref().unwrap_or_default();
                    self.set_state(ConnectionState::Connected, format!("Connected to @{}", name));
                } else {
                    self.set_state(ConnectionState::Disconnected, "Disconnected".to_string());
                }
            }
            ServerMessage::Comment(c) => {
                self.comments.push(EventCard::comment(c));
                reaction.utterance = Some(format!("{} says: {}", c.display_name, c.comment));
            }
            ServerMessage::Gift(g) => {
                self.gifts.push(EventCard::gift(g));
                reaction.utterance = Some(format!(
                    "{} sent {} {}",
                    g.display_name, g.repeat_count, g.gift_name
                ));
            }
            ServerMessage::Like(l) => {
                self.other.push(EventCard::like(l));
            }
            ServerMessage::Join(j) => {
                self.other.push(EventCard::join(j));
                reaction.utterance = Some(format!("{} joined", j.display_name));
            }
            ServerMessage::RoomStats(s) => {
                self.stats = Some(StatsView::from(s));
            }
            ServerMessage::StreamEnd(e) => {
                let reason = e.reason.as_deref().unwrap_or("unknown");
                self.set_state(ConnectionState::Disconnected, format!("Stream ended: {}", reason));
            }
            ServerMessage::Error(e) => {
                reaction.alert = Some(e.message.clone());
            }
        }
        reaction
    }

    /// The relay connection closed. Only changes the status while connected.
    pub fn transport_closed(&mut self) {
        if self.is_connected() {
            self.set_state(ConnectionState::Disconnected, "Lost connection to server".to_string());
        }
    }

    pub fn transport_error(&mut self) {
        self.set_state(ConnectionState::Disconnected, "WebSocket connection error".to_string());
    }

    /// Empty all three lists.
    pub fn clear_all(&mut self) {
        self.comments.clear();
        self.gifts.clear();
        self.other.clear();
    }

    fn set_state(&mut self, state: ConnectionState, text: String) {
        if state == ConnectionState::Disconnected {
            self.stats = None;
        }
        self.state = state;
        self.status_text = text;
    }
}

/// Which list a message's card goes to, if it produces one.
pub fn list_for(message: &ServerMessage) -> Option<ListKind> {
    match message {
        ServerMessage::Comment(_) => Some(ListKind::Comments),
        ServerMessage::Gift(_) => Some(ListKind::Gifts),
        ServerMessage::Like(_) | ServerMessage::Join(_) => Some(ListKind::Other),
        _ => None,
    }
}
