//! Shared relay state.
//!
//! The hub owns everything the lifecycle manager and the router coordinate
//! through:
//!
//! - the [`Registry`], [`MessageLog`] and [`PaymentSessions`], all behind one
//!   mutex so that every mutation of routing state is atomic;
//! - the table of live connection handles.
//!
//! Lock order is always directory first, then connection table. Events are
//! queued while the directory lock is held, which gives per-target delivery
//! order equal to routing order.

use crate::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use crate::lifecycle::ConnectionState;
use crate::log::{MessageLog, MessageLogEntry, DEFAULT_LOG_CAPACITY};
use crate::payment::{PaymentConfig, PaymentSessions};
use crate::registry::Registry;
use courier_protocol::{Identity, ServerEvent};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{info, trace, warn};

/// Default outbound queue size per connection.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Smallest outbound queue that fits the largest single-step batch
/// (bank details, timer start, receipt button).
pub const MIN_OUTBOUND_QUEUE_CAPACITY: usize = 3;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Events buffered per connection before deliveries start failing.
    pub outbound_queue_capacity: usize,
    /// Message log cap, `0` for unbounded.
    pub message_log_capacity: usize,
    /// Payment handshake timing.
    pub payment: PaymentConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            message_log_capacity: DEFAULT_LOG_CAPACITY,
            payment: PaymentConfig::default(),
        }
    }
}

/// Routing state guarded by the hub lock.
#[derive(Debug)]
pub(crate) struct Directory {
    pub(crate) registry: Registry,
    pub(crate) log: MessageLog,
    pub(crate) sessions: PaymentSessions,
}

/// A live connection.
#[derive(Debug)]
pub(crate) struct ConnectionEntry {
    pub(crate) handle: ConnectionHandle<ServerEvent>,
    pub(crate) state: ConnectionState,
}

/// The relay hub.
pub struct Hub {
    directory: Mutex<Directory>,
    pub(crate) connections: DashMap<ConnectionId, ConnectionEntry>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(mut config: HubConfig) -> Self {
        if config.outbound_queue_capacity < MIN_OUTBOUND_QUEUE_CAPACITY {
            warn!(
                requested = config.outbound_queue_capacity,
                minimum = MIN_OUTBOUND_QUEUE_CAPACITY,
                "Outbound queue capacity raised to minimum"
            );
            config.outbound_queue_capacity = MIN_OUTBOUND_QUEUE_CAPACITY;
        }
        info!("Creating hub with config: {:?}", config);
        Self {
            directory: Mutex::new(Directory {
                registry: Registry::new(),
                log: MessageLog::with_capacity(config.message_log_capacity),
                sessions: PaymentSessions::new(config.payment.clone()),
            }),
            connections: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock()
    }

    /// Queue an event for a connection.
    pub(crate) fn deliver(
        &self,
        connection: &ConnectionId,
        event: ServerEvent,
    ) -> Result<(), DeliveryError> {
        let entry = self
            .connections
            .get(connection)
            .ok_or(DeliveryError::Closed)?;
        trace!(connection = %connection, event = event.name(), "Queueing event");
        entry.handle.deliver(event)
    }

    /// Queue a batch of events for a connection, all or nothing.
    pub(crate) fn deliver_all(
        &self,
        connection: &ConnectionId,
        events: Vec<ServerEvent>,
    ) -> Result<usize, DeliveryError> {
        let entry = self
            .connections
            .get(connection)
            .ok_or(DeliveryError::Closed)?;
        trace!(connection = %connection, events = events.len(), "Queueing batch");
        entry.handle.deliver_all(events)
    }

    /// Queue an event for every live connection.
    ///
    /// Returns the number of connections that accepted it.
    pub(crate) fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            match entry.handle.deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection = %entry.key(), error = %e, event = event.name(), "Broadcast dropped");
                }
            }
        }
        delivered
    }

    /// Snapshot of registered identities and the message log.
    #[must_use]
    pub fn snapshot(&self) -> HubSnapshot {
        let directory = self.lock();
        HubSnapshot {
            connected_users: directory.registry.identities(),
            message_log: directory.log.entries(),
        }
    }

    /// Current hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let directory = self.lock();
        HubStats {
            connections: self.connections.len(),
            registered: directory.registry.len(),
            sessions: directory.sessions.len(),
            logged_messages: directory.log.len(),
            evicted_messages: directory.log.evicted(),
        }
    }

    /// Connection currently registered under `identity`.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<ConnectionId> {
        self.lock().registry.lookup(identity).cloned()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered identities and logged messages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    pub connected_users: Vec<Identity>,
    pub message_log: Vec<MessageLogEntry>,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Live connections, registered or not.
    pub connections: usize,
    /// Registered identities.
    pub registered: usize,
    /// Payment sessions in progress.
    pub sessions: usize,
    /// Retained message log entries.
    pub logged_messages: usize,
    /// Message log entries dropped to stay under the cap.
    pub evicted_messages: u64,
}
