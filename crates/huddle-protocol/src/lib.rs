//! # huddle-protocol
//!
//! Wire protocol definitions for Huddle.
//!
//! This crate defines the frames exchanged between Huddle clients and the
//! server, the [`PresenceEvent`] that is fanned out to room subscribers, and
//! the codecs used to put both on the wire.
//!
//! ## Frame Types
//!
//! - `Subscribe` / `Unsubscribe` - Attach a connection to a room's topic
//! - `Join` / `Leave` / `Message` - Room actions routed through presence
//! - `Event` - An enriched presence event delivered to subscribers
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{Frame, codec};
//!
//! let frame = Frame::join("room-1", "alice");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod event;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError, WireFormat};
pub use event::{EventKind, PresenceEvent};
pub use frames::{error_codes, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
