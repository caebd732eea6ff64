//! Inbound room actions and event construction helpers.

use huddle_protocol::EventKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of every room topic.
pub const TOPIC_PREFIX: &str = "/topic/room/";

/// Broadcast topic for a room.
///
/// Distinct room keys always map to distinct topics.
#[must_use]
pub fn topic_for(room_key: &str) -> String {
    format!("{TOPIC_PREFIX}{room_key}")
}

/// An action a client performs on a room.
///
/// Fields are passed through untouched: the router neither trims nor
/// validates room keys, usernames or message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Enter a room.
    Join { room_key: String, username: String },
    /// Leave a room.
    Leave { room_key: String, username: String },
    /// Send a chat message to a room.
    Message {
        room_key: String,
        username: String,
        content: Option<String>,
    },
}

impl Action {
    /// Create a join action.
    #[must_use]
    pub fn join(room_key: impl Into<String>, username: impl Into<String>) -> Self {
        Action::Join {
            room_key: room_key.into(),
            username: username.into(),
        }
    }

    /// Create a leave action.
    #[must_use]
    pub fn leave(room_key: impl Into<String>, username: impl Into<String>) -> Self {
        Action::Leave {
            room_key: room_key.into(),
            username: username.into(),
        }
    }

    /// Create a message action.
    #[must_use]
    pub fn message(
        room_key: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Action::Message {
            room_key: room_key.into(),
            username: username.into(),
            content: Some(content.into()),
        }
    }

    /// Kind of event this action produces.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Action::Join { .. } => EventKind::Join,
            Action::Leave { .. } => EventKind::Leave,
            Action::Message { .. } => EventKind::Message,
        }
    }

    /// Room the action targets.
    #[must_use]
    pub fn room_key(&self) -> &str {
        match self {
            Action::Join { room_key, .. }
            | Action::Leave { room_key, .. }
            | Action::Message { room_key, .. } => room_key,
        }
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Millisecond timestamps that never go backwards.
///
/// Readings follow the wall clock but are clamped to the largest value
/// handed out so far, so events built one after another get non-decreasing
/// timestamps even across a wall clock step back.
#[derive(Debug)]
pub struct EventClock {
    source: fn() -> u64,
    last: AtomicU64,
}

impl EventClock {
    /// Clock backed by the system wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(system_millis)
    }

    /// Clock backed by a custom millisecond source.
    #[must_use]
    pub fn with_source(source: fn() -> u64) -> Self {
        Self {
            source,
            last: AtomicU64::new(0),
        }
    }

    /// Current timestamp in milliseconds since the Unix epoch.
    pub fn now_millis(&self) -> u64 {
        let now = (self.source)();
        let previous = self.last.fetch_max(now, Ordering::AcqRel);
        previous.max(now)
    }
}

impl Default for EventClock {
    fn default() -> Self {
        Self::new()
    }
}
