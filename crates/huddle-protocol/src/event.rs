//! Presence events.
//!
//! A presence event is the enriched message every subscriber of a room
//! receives after a join, leave or chat message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of action that produced a presence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A participant joined the room.
    Join,
    /// A participant left the room.
    Leave,
    /// A participant sent a chat message.
    Message,
}

impl EventKind {
    /// Lowercase name used on the wire and in metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound event delivered to every subscriber of a room.
///
/// `participant_count` is the room's occupancy at the moment the event was
/// built. It is a snapshot: later readers may observe a different count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Room the event belongs to.
    pub room_key: String,
    /// Participant that caused the event.
    pub username: String,
    /// Chat text, or a human-readable notice for joins and leaves.
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Occupancy snapshot taken when the event was built.
    pub participant_count: usize,
}

impl PresenceEvent {
    /// Notice text for a join.
    #[must_use]
    pub fn joined_notice(username: &str) -> String {
        format!("{username} joined the room")
    }

    /// Notice text for a leave.
    #[must_use]
    pub fn left_notice(username: &str) -> String {
        format!("{username} left the room")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = PresenceEvent {
            kind: EventKind::Join,
            room_key: "room-1".into(),
            username: "alice".into(),
            content: PresenceEvent::joined_notice("alice"),
            timestamp: 1_700_000_000_000,
            participant_count: 1,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["roomKey"], "room-1");
        assert_eq!(value["content"], "alice joined the room");
        assert_eq!(value["participantCount"], 1);
    }

    #[test]
    fn test_notices() {
        assert_eq!(PresenceEvent::joined_notice("bob"), "bob joined the room");
        assert_eq!(PresenceEvent::left_notice(""), " left the room");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(EventKind::Message.to_string(), "message");
    }
}
