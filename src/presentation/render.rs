//! Text and HTML rendering for event cards and the stats panel.

use crate::events::{CommentEvent, GiftEvent, JoinEvent, LikeEvent};

/// Escape the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Compact counter: `1.2M`, `3.4K`, or the plain number below a thousand.
///
/// Rounds half up to one decimal.
pub fn format_count(n: u64) -> String {
    let (unit, suffix) = if n >= 1_000_000 {
        (1_000_000u64, "M")
    } else if n >= 1_000 {
        (1_000, "K")
    } else {
        return n.to_string();
    };
    let tenths = (u128::from(n) * 10 + u128::from(unit / 2)) / u128::from(unit);
    format!("{}.{}{}", tenths / 10, tenths % 10, suffix)
}

/// `HH:MM:SS` (UTC) for a millisecond Unix timestamp.
pub fn format_clock(timestamp_ms: u64) -> String {
    let secs = (timestamp_ms / 1000) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Which list a card belongs to and how it is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Comment,
    Gift,
    Like,
    Join,
}

impl CardKind {
    pub fn css_class(self) -> &'static str {
        match self {
            CardKind::Comment => "comment",
            CardKind::Gift => "gift",
            CardKind::Like => "like",
            CardKind::Join => "join",
        }
    }
}

/// One rendered entry in a list.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCard {
    pub kind: CardKind,
    pub username: String,
    pub display_name: String,
    pub body: String,
    pub profile_picture_url: Option<String>,
    pub timestamp: u64,
}

impl EventCard {
    pub fn comment(e: &CommentEvent) -> Self {
        Self {
            kind: CardKind::Comment,
            username: e.username.clone(),
            display_name: e.display_name.clone(),
            body: e.comment.clone(),
            profile_picture_url: e.profile_picture_url.clone(),
            timestamp: e.timestamp,
        }
    }

    pub fn gift(e: &GiftEvent) -> Self {
        Self {
            kind: CardKind::Gift,
            username: e.username.clone(),
            display_name: e.display_name.clone(),
            body: format!(
                "sent {} {} ({} diamonds)",
                e.repeat_count,
                e.gift_name,
                e.total_diamonds()
            ),
            profile_picture_url: e.profile_picture_url.clone(),
            timestamp: e.timestamp,
        }
    }

    pub fn like(e: &LikeEvent) -> Self {
        Self {
            kind: CardKind::Like,
            username: e.username.clone(),
            display_name: e.display_name.clone(),
            body: format!("sent {} likes", e.like_count),
            profile_picture_url: e.profile_picture_url.clone(),
            timestamp: e.timestamp,
        }
    }

    pub fn join(e: &JoinEvent) -> Self {
        Self {
            kind: CardKind::Join,
            username: e.username.clone(),
            display_name: e.display_name.clone(),
            body: "joined the live stream".to_string(),
            profile_picture_url: e.profile_picture_url.clone(),
            timestamp: e.timestamp,
        }
    }

    /// HTML fragment with every user-supplied field escaped. Same markup as
    /// `addCard` in `public/app.js`.
    pub fn to_html(&self) -> String {
        let picture = match &self.profile_picture_url {
            Some(url) => format!(
                "<img class=\"profile-pic\" src=\"{}\" alt=\"{}\">",
                escape_html(url),
                escape_html(&self.username)
            ),
            None => String::new(),
        };
        format!(
            "<div class=\"event {}\">{}<div><span class=\"username\">{}</span> \
             <span class=\"nickname\">{}</span></div><div class=\"content\">{}</div>\
             <div class=\"timestamp\">{}</div></div>",
            self.kind.css_class(),
            picture,
            escape_html(&self.username),
            escape_html(&self.display_name),
            escape_html(&self.body),
            format_clock(self.timestamp)
        )
    }

    /// Single plain-text line, as printed by the terminal client.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {} (@{}) {}",
            format_clock(self.timestamp),
            self.display_name,
            self.username,
            self.body
        )
    }
}
