//! Codec for encoding and decoding Huddle frames.
//!
//! Two encodings are supported:
//!
//! - MessagePack with length-prefixed framing, for binary WebSocket messages
//! - JSON, one frame per text WebSocket message

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Length-prefixed MessagePack in binary messages.
    #[default]
    #[serde(alias = "messagepack")]
    Msgpack,
    /// JSON in text messages.
    Json,
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Total size of the frame at the front of `data`, prefix included.
///
/// `None` until the whole length prefix has arrived.
fn framed_len(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(mut prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let payload_len = prefix.get_u32() as usize;
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len));
    }
    Ok(Some(LENGTH_PREFIX_SIZE + payload_len))
}

/// Decode exactly one frame from `data`.
///
/// Bytes after the first frame are ignored.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let needed = framed_len(data)?.unwrap_or(LENGTH_PREFIX_SIZE);
    match data.get(LENGTH_PREFIX_SIZE..needed) {
        Some(payload) => Ok(rmp_serde::from_slice(payload)?),
        None => Err(ProtocolError::Incomplete(needed - data.len())),
    }
}

/// Take the next complete frame off the front of a stream buffer.
///
/// Returns `Ok(None)` and leaves the buffer untouched while the frame is
/// still partial. Consumed bytes are dropped even if the payload fails to
/// decode.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(needed) = framed_len(buf)? else {
        return Ok(None);
    };
    if buf.len() < needed {
        return Ok(None);
    }

    let mut framed = buf.split_to(needed);
    framed.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(rmp_serde::from_slice(&framed)?))
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a frame from a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}
