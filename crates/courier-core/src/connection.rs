//! Connection handles.
//!
//! A handle pairs a [`ConnectionId`] with the bounded outbound queue of a live
//! transport session. The transport task owns the receiving end and writes
//! queued events to the socket.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Atomic counter for process-unique connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Why an event could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is saturated; the event was dropped.
    #[error("Outbound queue full")]
    QueueFull,

    /// The connection's writer has gone away.
    #[error("Connection closed")]
    Closed,
}

/// Handle to a live connection's outbound queue.
#[derive(Debug)]
pub struct ConnectionHandle<E> {
    id: ConnectionId,
    outbound: mpsc::Sender<E>,
}

impl<E> Clone for ConnectionHandle<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            outbound: self.outbound.clone(),
        }
    }
}

impl<E> ConnectionHandle<E> {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<E>) -> Self {
        Self { id, outbound }
    }

    /// Create a handle with a fresh ID and a bounded queue of `capacity` events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionId::generate(), tx), rx)
    }

    /// The connection's ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue an event without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] when the queue is saturated and
    /// [`DeliveryError::Closed`] when the connection is gone.
    pub fn deliver(&self, event: E) -> Result<(), DeliveryError> {
        self.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue a batch of events without blocking, all or nothing.
    ///
    /// Slots for the whole batch are reserved before anything is sent, so a
    /// concurrent sender can never leave the batch half queued.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] when fewer than `events.len()`
    /// slots are free and [`DeliveryError::Closed`] when the connection is
    /// gone. Nothing is queued in either case.
    pub fn deliver_all(&self, events: Vec<E>) -> Result<usize, DeliveryError> {
        if events.is_empty() {
            return Ok(0);
        }

        let permits = self.outbound.try_reserve_many(events.len()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => DeliveryError::Closed,
        })?;

        let count = events.len();
        for (permit, event) in permits.zip(events) {
            permit.send(event);
        }
        Ok(count)
    }
}
