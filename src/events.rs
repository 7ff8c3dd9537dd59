//! Wire shapes: upstream connector events, client commands, and the
//! normalized messages sent to browser sessions.
//!
//! ## Normalization
//! - every upstream event maps to at most one [`ServerMessage`]
//! - gifts are forwarded only when they are a single discrete item
//!   (`giftType == 1` and not a group gift); streaks still accumulating are dropped
//! - timestamps are the relay's receipt time, never upstream-supplied

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Gift type the platform uses for a single discrete item.
pub const DISCRETE_GIFT_TYPE: i64 = 1;

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Canonical channel name: surrounding whitespace trimmed and one leading `@`
/// removed. `"@alice"` and `"alice"` name the same channel.
pub fn canonical_channel(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).to_string()
}

// ---------------------------------------------------------------------------
// Upstream events (platform field names)
// ---------------------------------------------------------------------------

/// The fixed set of event kinds an upstream connector emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Comment,
    Gift,
    Like,
    Member,
    RoomUser,
    StreamEnd,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Comment,
        EventKind::Gift,
        EventKind::Like,
        EventKind::Member,
        EventKind::RoomUser,
        EventKind::StreamEnd,
        EventKind::Error,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Comment => write!(f, "comment"),
            EventKind::Gift => write!(f, "gift"),
            EventKind::Like => write!(f, "like"),
            EventKind::Member => write!(f, "member"),
            EventKind::RoomUser => write!(f, "roomUser"),
            EventKind::StreamEnd => write!(f, "streamEnd"),
            EventKind::Error => write!(f, "error"),
        }
    }
}

/// Identity fields shared by every user-originated upstream event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamUser {
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamComment {
    #[serde(flatten)]
    pub user: UpstreamUser,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamGift {
    #[serde(flatten)]
    pub user: UpstreamUser,
    #[serde(default)]
    pub gift_name: String,
    #[serde(default)]
    pub gift_type: i64,
    #[serde(default)]
    pub is_group_gift: bool,
    #[serde(default)]
    pub diamond_count: u64,
    #[serde(default)]
    pub repeat_count: u64,
}

impl UpstreamGift {
    /// True for a single discrete gift; false for group gifts and for
    /// streakable gifts whose repeat count is still accumulating.
    pub fn is_discrete(&self) -> bool {
        self.gift_type == DISCRETE_GIFT_TYPE && !self.is_group_gift
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamLike {
    #[serde(flatten)]
    pub user: UpstreamUser,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub total_like_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_status: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMember {
    #[serde(flatten)]
    pub user: UpstreamUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_info: Option<FollowInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRoomUser {
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub diamond_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamStreamEnd {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub message: String,
}

/// One event from an upstream connector, in the platform's vocabulary.
///
/// Serialized as `{"event": "<kind>", "data": {...}}`, the frame format the
/// connector sidecar speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum UpstreamEvent {
    Comment(UpstreamComment),
    Gift(UpstreamGift),
    Like(UpstreamLike),
    Member(UpstreamMember),
    RoomUser(UpstreamRoomUser),
    StreamEnd(UpstreamStreamEnd),
    Error(UpstreamError),
}

impl UpstreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            UpstreamEvent::Comment(_) => EventKind::Comment,
            UpstreamEvent::Gift(_) => EventKind::Gift,
            UpstreamEvent::Like(_) => EventKind::Like,
            UpstreamEvent::Member(_) => EventKind::Member,
            UpstreamEvent::RoomUser(_) => EventKind::RoomUser,
            UpstreamEvent::StreamEnd(_) => EventKind::StreamEnd,
            UpstreamEvent::Error(_) => EventKind::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Client commands
// ---------------------------------------------------------------------------

/// A command sent by a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ClientCommand {
    Connect { username: String },
    Disconnect,
}

impl ClientCommand {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Normalized messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEvent {
    pub username: String,
    pub display_name: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub username: String,
    pub display_name: String,
    pub gift_name: String,
    pub diamond_count: u64,
    pub repeat_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    pub timestamp: u64,
}

impl GiftEvent {
    /// Value shown for the gift: unit diamond cost times repeat count.
    pub fn total_diamonds(&self) -> u64 {
        self.diamond_count.saturating_mul(self.repeat_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEvent {
    pub username: String,
    pub display_name: String,
    pub like_count: u64,
    pub total_like_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEvent {
    pub username: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_role: Option<i64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatsEvent {
    pub viewer_count: u64,
    pub like_count: u64,
    pub diamond_count: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndEvent {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// A message sent from the relay to one browser session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Status(StatusEvent),
    Comment(CommentEvent),
    Gift(GiftEvent),
    Like(LikeEvent),
    Join(JoinEvent),
    RoomStats(RoomStatsEvent),
    StreamEnd(StreamEndEvent),
    Error(ErrorEvent),
}

impl ServerMessage {
    pub fn connected(username: impl Into<String>, room_info: Option<serde_json::Value>) -> Self {
        ServerMessage::Status(StatusEvent {
            connected: true,
            username: Some(username.into()),
            room_info,
        })
    }

    pub fn disconnected() -> Self {
        ServerMessage::Status(StatusEvent {
            connected: false,
            username: None,
            room_info: None,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorEvent {
            message: message.into(),
        })
    }

    /// The `type` discriminant as it appears on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Status(_) => "status",
            ServerMessage::Comment(_) => "comment",
            ServerMessage::Gift(_) => "gift",
            ServerMessage::Like(_) => "like",
            ServerMessage::Join(_) => "join",
            ServerMessage::RoomStats(_) => "roomStats",
            ServerMessage::StreamEnd(_) => "streamEnd",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Map one upstream event to the message forwarded to the session.
///
/// `received_at_ms` is stamped on every timestamped variant. Returns `None`
/// for gifts that are not single discrete items.
pub fn normalize(event: UpstreamEvent, received_at_ms: u64) -> Option<ServerMessage> {
    let msg = match event {
        UpstreamEvent::Comment(c) => ServerMessage::Comment(CommentEvent {
            username: c.user.unique_id,
            display_name: c.user.nickname,
            comment: c.comment,
            profile_picture_url: c.user.profile_picture_url,
            timestamp: received_at_ms,
        }),
        UpstreamEvent::Gift(g) => {
            if !g.is_discrete() {
                return None;
            }
            ServerMessage::Gift(GiftEvent {
                username: g.user.unique_id,
                display_name: g.user.nickname,
                gift_name: g.gift_name,
                diamond_count: g.diamond_count,
                repeat_count: g.repeat_count,
                profile_picture_url: g.user.profile_picture_url,
                timestamp: received_at_ms,
            })
        }
        UpstreamEvent::Like(l) => ServerMessage::Like(LikeEvent {
            username: l.user.unique_id,
            display_name: l.user.nickname,
            like_count: l.like_count,
            total_like_count: l.total_like_count,
            profile_picture_url: l.user.profile_picture_url,
            timestamp: received_at_ms,
        }),
        UpstreamEvent::Member(m) => ServerMessage::Join(JoinEvent {
            username: m.user.unique_id,
            display_name: m.user.nickname,
            profile_picture_url: m.user.profile_picture_url,
            follow_role: m.follow_info.and_then(|f| f.follow_status),
            timestamp: received_at_ms,
        }),
        UpstreamEvent::RoomUser(r) => ServerMessage::RoomStats(RoomStatsEvent {
            viewer_count: r.viewer_count,
            like_count: r.like_count,
            diamond_count: r.diamond_count,
            timestamp: received_at_ms,
        }),
        UpstreamEvent::StreamEnd(s) => ServerMessage::StreamEnd(StreamEndEvent { reason: s.reason }),
        UpstreamEvent::Error(e) => ServerMessage::error(format!("Connection error: {}", e.message)),
    };
    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn user(id: &str) -> UpstreamUser {
        UpstreamUser {
            unique_id: id.to_string(),
            nickname: format!("{} nick", id),
            profile_picture_url: None,
        }
    }

    fn gift(gift_type: i64, group: bool, diamonds: u64, repeat: u64) -> UpstreamGift {
        UpstreamGift {
            user: user("bob"),
            gift_name: "Rose".into(),
            gift_type,
            is_group_gift: group,
            diamond_count: diamonds,
            repeat_count: repeat,
        }
    }

    // -- canonical_channel --

    #[rstest]
    #[case("@alice", "alice")]
    #[case("alice", "alice")]
    #[case("  @alice ", "alice")]
    #[case("@@alice", "@alice")]
    #[case("@", "")]
    #[case("", "")]
    fn test_canonical_channel(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(canonical_channel(raw), expected);
    }

    // -- gift filtering --

    #[rstest]
    #[case(1, false, true)]
    #[case(1, true, false)]
    #[case(2, false, false)]
    #[case(0, false, false)]
    #[case(2, true, false)]
    fn test_gift_is_discrete(#[case] gift_type: i64, #[case] group: bool, #[case] expected: bool) {
        assert_eq!(gift(gift_type, group, 1, 1).is_discrete(), expected);
    }

    #[test]
    fn test_normalize_drops_group_gift() {
        assert!(normalize(UpstreamEvent::Gift(gift(1, true, 5, 3)), 1).is_none());
    }

    #[test]
    fn test_normalize_drops_streak_gift() {
        assert!(normalize(UpstreamEvent::Gift(gift(2, false, 5, 3)), 1).is_none());
    }

    #[test]
    fn test_normalize_forwards_discrete_gift_with_total() {
        let msg = normalize(UpstreamEvent::Gift(gift(1, false, 5, 3)), 42).unwrap();
        match msg {
            ServerMessage::Gift(g) => {
                assert_eq!(g.diamond_count, 5);
                assert_eq!(g.repeat_count, 3);
                assert_eq!(g.total_diamonds(), 15);
                assert_eq!(g.timestamp, 42);
                assert_eq!(g.username, "bob");
            }
            other => panic!("expected gift, got {:?}", other),
        }
    }

    #[test]
    fn test_total_diamonds_saturates() {
        let g = GiftEvent {
            username: String::new(),
            display_name: String::new(),
            gift_name: String::new(),
            diamond_count: u64::MAX,
            repeat_count: 2,
            profile_picture_url: None,
            timestamp: 0,
        };
        assert_eq!(g.total_diamonds(), u64::MAX);
    }

    // -- other mappings --

    #[test]
    fn test_normalize_comment_uses_receipt_time() {
        let ev = UpstreamEvent::Comment(UpstreamComment {
            user: user("carol"),
            comment: "hi".into(),
        });
        let msg = normalize(ev, 1_700_000_000_000).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Comment(CommentEvent {
                username: "carol".into(),
                display_name: "carol nick".into(),
                comment: "hi".into(),
                profile_picture_url: None,
                timestamp: 1_700_000_000_000,
            })
        );
    }

    #[test]
    fn test_normalize_member_becomes_join_with_follow_role() {
        let ev = UpstreamEvent::Member(UpstreamMember {
            user: user("dave"),
            follow_info: Some(FollowInfo { follow_status: Some(2) }),
        });
        match normalize(ev, 7).unwrap() {
            ServerMessage::Join(j) => {
                assert_eq!(j.follow_role, Some(2));
                assert_eq!(j.timestamp, 7);
            }
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_room_user_is_verbatim() {
        let ev = UpstreamEvent::RoomUser(UpstreamRoomUser {
            viewer_count: 120,
            like_count: 9_000,
            diamond_count: 33,
        });
        assert_eq!(
            normalize(ev, 5).unwrap(),
            ServerMessage::RoomStats(RoomStatsEvent {
                viewer_count: 120,
                like_count: 9_000,
                diamond_count: 33,
                timestamp: 5,
            })
        );
    }

    #[test]
    fn test_normalize_stream_end_keeps_reason() {
        let ev = UpstreamEvent::StreamEnd(UpstreamStreamEnd {
            reason: Some("host ended".into()),
        });
        assert_eq!(
            normalize(ev, 0).unwrap(),
            ServerMessage::StreamEnd(StreamEndEvent {
                reason: Some("host ended".into())
            })
        );
    }

    #[test]
    fn test_normalize_error_prefixes_message() {
        let ev = UpstreamEvent::Error(UpstreamError {
            message: "socket reset".into(),
        });
        assert_eq!(
            normalize(ev, 0).unwrap(),
            ServerMessage::error("Connection error: socket reset")
        );
    }

    // -- wire shapes --

    #[test]
    fn test_upstream_gift_parses_platform_fields() {
        let raw = json!({
            "event": "gift",
            "data": {
                "uniqueId": "bob",
                "nickname": "Bob",
                "giftName": "Rose",
                "giftType": 1,
                "isGroupGift": false,
                "diamondCount": 5,
                "repeatCount": 3,
                "profilePictureUrl": "https://example.com/p.png"
            }
        });
        let ev: UpstreamEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.kind(), EventKind::Gift);
        match ev {
            UpstreamEvent::Gift(g) => {
                assert!(g.is_discrete());
                assert_eq!(g.user.profile_picture_url.as_deref(), Some("https://example.com/p.png"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_upstream_member_nested_follow_info() {
        let raw = json!({
            "event": "member",
            "data": {"uniqueId": "x", "nickname": "X", "followInfo": {"followStatus": 1}}
        });
        let ev: UpstreamEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.kind(), EventKind::Member);
    }

    #[test]
    fn test_upstream_room_user_kind_name() {
        let raw = json!({"event": "roomUser", "data": {"viewerCount": 3}});
        let ev: UpstreamEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.kind(), EventKind::RoomUser);
        assert_eq!(ev.kind().to_string(), "roomUser");
    }

    #[test]
    fn test_event_kind_all_is_complete() {
        assert_eq!(EventKind::ALL.len(), 7);
    }

    #[rstest]
    #[case(r#"{"command":"connect","username":"@alice"}"#, ClientCommand::Connect { username: "@alice".into() })]
    #[case(r#"{"command":"disconnect"}"#, ClientCommand::Disconnect)]
    fn test_client_command_parse(#[case] raw: &str, #[case] expected: ClientCommand) {
        assert_eq!(ClientCommand::parse(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"command":"dance"}"#)]
    #[case(r#"{"command":"connect"}"#)]
    #[case(r#"{"username":"alice"}"#)]
    fn test_client_command_rejects_malformed(#[case] raw: &str) {
        assert!(ClientCommand::parse(raw).is_err());
    }

    #[test]
    fn test_status_connected_wire_shape() {
        let msg = ServerMessage::connected("alice", Some(json!({"title": "t"})));
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["connected"], true);
        assert_eq!(v["username"], "alice");
        assert_eq!(v["roomInfo"]["title"], "t");
    }

    #[test]
    fn test_status_disconnected_omits_optional_fields() {
        let json = ServerMessage::disconnected().to_json().unwrap();
        assert_eq!(json, r#"{"type":"status","connected":false}"#);
    }

    #[test]
    fn test_room_stats_wire_shape_is_camel_case() {
        let msg = ServerMessage::RoomStats(RoomStatsEvent {
            viewer_count: 1,
            like_count: 2,
            diamond_count: 3,
            timestamp: 4,
        });
        let v: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "roomStats");
        assert_eq!(v["viewerCount"], 1);
        assert_eq!(v["likeCount"], 2);
        assert_eq!(v["diamondCount"], 3);
        assert_eq!(msg.type_name(), "roomStats");
    }

    #[test]
    fn test_stream_end_wire_shape() {
        let msg = ServerMessage::StreamEnd(StreamEndEvent { reason: Some("x".into()) });
        let v: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "streamEnd");
        assert_eq!(v["reason"], "x");
    }

    #[test]
    fn test_server_message_round_trips_through_client_parser() {
        let msg = ServerMessage::Join(JoinEvent {
            username: "u".into(),
            display_name: "U".into(),
            profile_picture_url: Some("p".into()),
            follow_role: None,
            timestamp: 10,
        });
        let back: ServerMessage = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }
}
