//! Codec for encoding and decoding Courier frames.
//!
//! Text frames are JSON. Binary frames are MessagePack with named fields, so
//! both encodings carry the same structure.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
///
/// A decode failure on an inbound frame is a malformed payload: the caller
/// logs it and keeps the connection open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// MessagePack binary frames.
    MessagePack,
}

/// An encoded frame, ready to be written to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Text(String),
    Binary(Bytes),
}

impl Encoded {
    /// Wire format of this frame.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        match self {
            Encoded::Text(_) => WireFormat::Json,
            Encoded::Binary(_) => WireFormat::MessagePack,
        }
    }

    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    check_size(text.len())?;
    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or does not describe a frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    check_size(text.len())?;
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame as MessagePack.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode_binary<T: Serialize>(frame: &T) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;
    check_size(payload.len())?;
    Ok(Bytes::from(payload))
}

/// Decode a frame from MessagePack.
///
/// # Errors
///
/// Returns an error if the data is too large or does not describe a frame.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    check_size(data.len())?;
    Ok(rmp_serde::from_slice(data)?)
}

/// Encode a frame in the given wire format.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode_as<T: Serialize>(frame: &T, format: WireFormat) -> Result<Encoded, ProtocolError> {
    match format {
        WireFormat::Json => encode(frame).map(Encoded::Text),
        WireFormat::MessagePack => encode_binary(frame).map(Encoded::Binary),
    }
}

/// Decode a frame in whichever format it arrived.
///
/// # Errors
///
/// Returns an error if the frame is malformed or too large.
pub fn decode_encoded<T: DeserializeOwned>(frame: &Encoded) -> Result<T, ProtocolError> {
    match frame {
        Encoded::Text(text) => decode(text),
        Encoded::Binary(data) => decode_binary(data),
    }
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}
