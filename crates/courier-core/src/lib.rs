//! # courier-core
//!
//! Identity registry, message routing and the payment handshake for the
//! Courier relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Bidirectional identity ↔ connection mapping
//! - **Lifecycle** - Connect, register and disconnect transitions
//! - **Router** - Private messages and payment steps between identities
//! - **Payment** - Per-pair handshake state machine
//! - **Notifier** - Payment success pushes from an upstream source
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  Lifecycle  │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       ▲
//!        ▼                                       │
//! ┌─────────────┐     ┌─────────────┐            │
//! │   Router    │────▶│  Payments   │────────────┘
//! └─────────────┘     └─────────────┘
//! ```
//!
//! The registry, message log and payment sessions live in one [`Hub`] and
//! are mutated under a single lock.

pub mod connection;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod log;
pub mod notifier;
pub mod payment;
pub mod registry;
pub mod router;

pub use connection::{ConnectionHandle, ConnectionId, DeliveryError};
pub use error::RouteError;
pub use hub::{Hub, HubConfig, HubSnapshot, HubStats};
pub use lifecycle::{ConnectionState, Lifecycle};
pub use log::{MessageLog, MessageLogEntry};
pub use notifier::{
    poll_once, run_poller, Notifier, PaymentResult, PaymentStatusSource, SimulatedPaymentSource,
    SourceError,
};
pub use payment::{PaymentConfig, PaymentStage, PaymentStep};
pub use registry::Registry;
pub use router::{MessageRouter, RouteOutcome};
