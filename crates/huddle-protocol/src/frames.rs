//! Frame types for the Huddle protocol.
//!
//! Frames are the fundamental unit of communication in Huddle.
//! Each frame is serialized either as length-prefixed MessagePack or as a
//! JSON text message, see [`crate::codec`].

use crate::event::PresenceEvent;
use serde::{Deserialize, Serialize};

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The inbound frame could not be decoded or was unexpected.
    pub const INVALID_FRAME: u16 = 1001;
    /// Subscribing to a room failed.
    pub const SUBSCRIBE_FAILED: u16 = 1002;
    /// The presence event could not be delivered.
    pub const DELIVERY_FAILED: u16 = 1003;
    /// The connection is not subscribed to the room.
    pub const NOT_SUBSCRIBED: u16 = 1008;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 0x01,
    Unsubscribe = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Message = 0x05,
    Event = 0x06,
    Ack = 0x07,
    Error = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
    Connected = 0x0B,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Subscribe),
            0x02 => Ok(FrameType::Unsubscribe),
            0x03 => Ok(FrameType::Join),
            0x04 => Ok(FrameType::Leave),
            0x05 => Ok(FrameType::Message),
            0x06 => Ok(FrameType::Event),
            0x07 => Ok(FrameType::Ack),
            0x08 => Ok(FrameType::Error),
            0x09 => Ok(FrameType::Ping),
            0x0A => Ok(FrameType::Pong),
            0x0B => Ok(FrameType::Connected),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
///
/// Room actions (`Join`, `Leave`, `Message`) carry an optional request ID;
/// when present the server answers with an `Ack` or an `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Start receiving events for a room.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room key.
        room: String,
    },

    /// Stop receiving events for a room.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room key.
        room: String,
    },

    /// Enter a room.
    #[serde(rename = "join")]
    Join {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        room: String,
        username: String,
    },

    /// Leave a room.
    #[serde(rename = "leave")]
    Leave {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        room: String,
        username: String,
    },

    /// Send a chat message to a room.
    #[serde(rename = "message")]
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        room: String,
        username: String,
        /// Chat text. Absent content is delivered as an empty message.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// A presence event fanned out to room subscribers.
    #[serde(rename = "event")]
    Event {
        /// Topic the event was published on.
        topic: String,
        event: PresenceEvent,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Sent by the server once a connection is established.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection ID.
        connection_id: String,
        /// Protocol major version.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Message { .. } => FrameType::Message,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, room: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            room: room.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, room: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            room: room.into(),
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(room: impl Into<String>, username: impl Into<String>) -> Self {
        Frame::Join {
            id: None,
            room: room.into(),
            username: username.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(room: impl Into<String>, username: impl Into<String>) -> Self {
        Frame::Leave {
            id: None,
            room: room.into(),
            username: username.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(
        room: impl Into<String>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Frame::Message {
            id: None,
            room: room.into(),
            username: username.into(),
            content: Some(content.into()),
        }
    }

    /// Attach a request ID to a room action so the server acknowledges it.
    ///
    /// Frames other than `Join`, `Leave` and `Message` are returned unchanged.
    #[must_use]
    pub fn with_id(mut self, request_id: u64) -> Self {
        match &mut self {
            Frame::Join { id, .. } | Frame::Leave { id, .. } | Frame::Message { id, .. } => {
                *id = Some(request_id);
            }
            _ => {}
        }
        self
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(topic: impl Into<String>, event: PresenceEvent) -> Self {
        Frame::Event {
            topic: topic.into(),
            event,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
