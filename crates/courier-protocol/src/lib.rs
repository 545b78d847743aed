//! # courier-protocol
//!
//! Wire definitions for the Courier realtime relay.
//!
//! Two surfaces share this crate:
//!
//! - **Realtime channel** - `{"event": <name>, "data": <payload>}` envelopes
//!   carrying private messages and the payment handshake
//!   ([`ClientEvent`] inbound, [`ServerEvent`] outbound).
//! - **Notifier** - flat `{"type": ...}` frames used by the payment
//!   notification socket ([`NotifierFrame`]).
//!
//! Text frames are JSON; binary frames carry the same structure as MessagePack.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, ClientEvent};
//!
//! let raw = r#"{"event":"sendPrivateMessage","data":{"from":"u1","to":"u2","message":"hi"}}"#;
//! let event: ClientEvent = codec::decode(raw).unwrap();
//! assert_eq!(event.name(), "sendPrivateMessage");
//! ```

pub mod codec;
pub mod events;
pub mod notifier;

pub use codec::{decode, decode_encoded, encode, encode_as, Encoded, ProtocolError, WireFormat};
pub use events::{Answer, ClientEvent, Identity, Registration, ServerEvent};
pub use notifier::NotifierFrame;
