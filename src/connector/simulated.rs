//! In-process connector that invents plausible live-room traffic.
//!
//! Used with `--upstream simulated` for demos and UI work without a sidecar.
//! Channels whose name starts with `offline` refuse to connect with
//! [`ConnectionError::NotLive`].

use futures_util::future::BoxFuture;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{validate_channel, Connector, ConnectorFactory, ConnectorHandle, EventSink, RoomInfo};
use crate::error::{ConnectionError, DisconnectError};
use crate::events::{
    FollowInfo, UpstreamComment, UpstreamEvent, UpstreamGift, UpstreamLike, UpstreamMember,
    UpstreamRoomUser, UpstreamUser,
};

const VIEWERS: &[(&str, &str)] = &[
    ("mika_77", "Mika"),
    ("theo.draws", "Theo"),
    ("linh_nguyen", "Linh"),
    ("sam", "Sam <3"),
    ("quiet.fox", "Quiet Fox"),
];

const COMMENTS: &[&str] = &[
    "hello from the chat!",
    "what song is this?",
    "first time here",
    "love this stream",
    "can you say hi to me?",
];

/// (name, diamond cost, gift type)
const GIFTS: &[(&str, u64, i64)] = &[
    ("Rose", 1, 1),
    ("Finger Heart", 5, 1),
    ("Galaxy", 1000, 2),
    ("Doughnut", 30, 1),
];

/// Tunables for the generator.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Delay before `connect()` resolves.
    pub connect_latency: Duration,
    /// Pause between generated events.
    pub event_interval: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            connect_latency: Duration::from_millis(250),
            event_interval: Duration::from_millis(900),
        }
    }
}

/// Running totals the generator reports through `roomUser` events.
#[derive(Debug, Default, Clone)]
struct RoomTotals {
    viewers: u64,
    likes: u64,
    diamonds: u64,
}

/// Produce one random upstream event and update the running totals.
fn random_event<R: Rng>(rng: &mut R, totals: &mut RoomTotals) -> UpstreamEvent {
    let (id, nick) = VIEWERS[rng.gen_range(0..VIEWERS.len())];
    let user = UpstreamUser {
        unique_id: id.to_string(),
        nickname: nick.to_string(),
        profile_picture_url: None,
    };
    match rng.gen_range(0u8..10) {
        0..=3 => UpstreamEvent::Comment(UpstreamComment {
            user,
            comment: COMMENTS[rng.gen_range(0..COMMENTS.len())].to_string(),
        }),
        4 | 5 => {
            let (name, cost, gift_type) = GIFTS[rng.gen_range(0..GIFTS.len())];
            let repeat = rng.gen_range(1..=5);
            if gift_type == 1 {
                totals.diamonds += cost * repeat;
            }
            UpstreamEvent::Gift(UpstreamGift {
                user,
                gift_name: name.to_string(),
                gift_type,
                is_group_gift: rng.gen_bool(0.1),
                diamond_count: cost,
                repeat_count: repeat,
            })
        }
        6 | 7 => {
            let count = rng.gen_range(1..=15);
            totals.likes += count;
            UpstreamEvent::Like(UpstreamLike {
                user,
                like_count: count,
                total_like_count: totals.likes,
            })
        }
        8 => {
            totals.viewers += 1;
            UpstreamEvent::Member(UpstreamMember {
                user,
                follow_info: Some(FollowInfo {
                    follow_status: Some(rng.gen_range(0..=2)),
                }),
            })
        }
        _ => UpstreamEvent::RoomUser(UpstreamRoomUser {
            viewer_count: totals.viewers,
            like_count: totals.likes,
            diamond_count: totals.diamonds,
        }),
    }
}

async fn generate(sink: EventSink, interval: Duration) {
    let mut totals = RoomTotals {
        viewers: rand::thread_rng().gen_range(20..200),
        ..RoomTotals::default()
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        // ThreadRng is !Send; keep it scoped between awaits.
        let event = random_event(&mut rand::thread_rng(), &mut totals);
        if !sink.emit(event) {
            return;
        }
    }
}

/// Connector backed by the random generator.
pub struct SimulatedConnector {
    channel: String,
    sink: EventSink,
    settings: SimulationSettings,
    generator: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedConnector {
    pub fn new(channel: &str, sink: EventSink, settings: SimulationSettings) -> Self {
        Self {
            channel: channel.to_string(),
            sink,
            settings,
            generator: Mutex::new(None),
        }
    }

    /// True while the generator task is running.
    pub fn is_running(&self) -> bool {
        self.generator
            .lock()
            .map(|g| g.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn start(&self) -> Result<RoomInfo, ConnectionError> {
        validate_channel(&self.channel)?;
        tokio::time::sleep(self.settings.connect_latency).await;
        if self.channel.starts_with("offline") {
            return Err(ConnectionError::NotLive(self.channel.clone()));
        }

        let handle = tokio::spawn(generate(self.sink.clone(), self.settings.event_interval));
        if let Ok(mut slot) = self.generator.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(Some(serde_json::json!({
            "roomId": format!("sim-{}", self.channel),
            "title": format!("Simulated live room of @{}", self.channel),
            "simulated": true,
        })))
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.generator.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Connector for SimulatedConnector {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn connect(&self) -> BoxFuture<'_, Result<RoomInfo, ConnectionError>> {
        Box::pin(self.start())
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        self.stop();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for SimulatedConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds [`SimulatedConnector`]s.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFactory {
    settings: SimulationSettings,
}

impl SimulatedFactory {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }
}

impl ConnectorFactory for SimulatedFactory {
    fn create(&self, channel: &str, sink: EventSink) -> ConnectorHandle {
        Arc::new(SimulatedConnector::new(channel, sink, self.settings.clone()))
    }
}
