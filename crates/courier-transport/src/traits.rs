//! Transport abstraction traits for Courier.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the server to be transport-agnostic.

use async_trait::async_trait;
use courier_protocol::{codec, Encoded, ProtocolError, WireFormat};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// WebSocket handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    ///
    /// A malformed frame is dropped; everything else ends the connection.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

/// An active connection over a transport.
///
/// Connections carry text and binary frames between the server and a
/// single client.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next frame from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Encoded>, TransportError>;

    /// Send an encoded frame.
    async fn send(&mut self, frame: Encoded) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// Receive and decode the next frame.
///
/// Returns the decoded value with the format it arrived in, or `None` once
/// the connection is closed. A frame that fails to decode is returned as a
/// recoverable [`TransportError::Protocol`].
///
/// # Errors
///
/// Returns an error if receiving or decoding fails.
pub async fn recv_frame<T: DeserializeOwned>(
    conn: &mut dyn Connection,
) -> Result<Option<(T, WireFormat)>, TransportError> {
    let Some(frame) = conn.recv().await? else {
        return Ok(None);
    };
    let value = codec::decode_encoded(&frame)?;
    Ok(Some((value, frame.format())))
}

/// Encode and send a frame in the given format.
///
/// # Errors
///
/// Returns an error if encoding or sending fails.
pub async fn send_frame<T: Serialize + Sync>(
    conn: &mut dyn Connection,
    frame: &T,
    format: WireFormat,
) -> Result<(), TransportError> {
    let encoded = codec::encode_as(frame, format)?;
    conn.send(encoded).await
}
