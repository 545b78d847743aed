//! # courier-transport
//!
//! Transport abstraction layer for the Courier relay.
//!
//! The realtime channel is served through the HTTP router; this crate covers
//! surfaces that listen on their own socket, such as the payment notifier.
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits,
//! so the server can stay protocol-agnostic.
//!
//! ```rust,ignore
//! use courier_transport::{recv_frame, Connection};
//! use courier_protocol::NotifierFrame;
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some((frame, _format))) = recv_frame::<NotifierFrame>(conn.as_mut()).await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{recv_frame, send_frame, Connection, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
