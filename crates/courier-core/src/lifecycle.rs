//! Connection lifecycle manager.
//!
//! Tracks each connection through `Connected → Registered(identity) → Closed`
//! and keeps the registry in step with those transitions. Every change to the
//! registered identity set is broadcast as `userListUpdate` to all live
//! connections.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::hub::{ConnectionEntry, Hub};
use courier_protocol::{Identity, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up, no identity bound.
    Connected,
    /// Bound to an identity.
    Registered(Identity),
    /// Transport is gone.
    Closed,
}

/// Drives connect, register and disconnect transitions.
#[derive(Clone)]
pub struct Lifecycle {
    hub: Arc<Hub>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Open a connection with a fresh ID and the hub's queue capacity.
    ///
    /// Returns the handle and the receiving end of its outbound queue.
    #[must_use]
    pub fn open(&self) -> (ConnectionHandle<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel(self.hub.config().outbound_queue_capacity);
        self.connect(handle.clone());
        (handle, rx)
    }

    /// Track a newly connected transport session.
    pub fn connect(&self, handle: ConnectionHandle<ServerEvent>) {
        let id = handle.id().clone();
        self.hub.connections.insert(
            id.clone(),
            ConnectionEntry {
                handle,
                state: ConnectionState::Connected,
            },
        );
        debug!(connection = %id, "Connection opened");
    }

    /// Bind `identity` to `connection` and broadcast the new identity set.
    ///
    /// Returns the broadcast identity set, or `None` if the connection is
    /// no longer live.
    pub fn register(
        &self,
        connection: &ConnectionId,
        identity: impl Into<Identity>,
    ) -> Option<Vec<Identity>> {
        let identity = identity.into();
        let mut directory = self.hub.lock();

        if !self.hub.connections.contains_key(connection) {
            debug!(connection = %connection, identity = %identity, "Register from closed connection ignored");
            return None;
        }

        let rebinding = directory.registry.register(identity.clone(), connection.clone());

        if let Some(displaced) = &rebinding.displaced {
            if let Some(mut entry) = self.hub.connections.get_mut(displaced) {
                entry.state = ConnectionState::Connected;
            }
        }
        if let Some(mut entry) = self.hub.connections.get_mut(connection) {
            entry.state = ConnectionState::Registered(identity.clone());
        }

        let identities = directory.registry.identities();
        let notified = self
            .hub
            .broadcast(&ServerEvent::UserListUpdate(identities.clone()));

        debug!(
            connection = %connection,
            identity = %identity,
            previous = ?rebinding.previous_identity,
            registered = identities.len(),
            notified,
            "User registered"
        );

        Some(identities)
    }

    /// Tear down a connection.
    ///
    /// Removes its identity (if any) and broadcasts the new identity set when
    /// one was removed. Safe to call more than once.
    pub fn disconnect(&self, connection: &ConnectionId) -> Option<Identity> {
        let mut directory = self.hub.lock();

        let removed = directory.registry.unregister_by_connection(connection);
        self.hub.connections.remove(connection);

        if let Some(identity) = &removed {
            let identities = directory.registry.identities();
            self.hub.broadcast(&ServerEvent::UserListUpdate(identities));
            debug!(connection = %connection, identity = %identity, "User disconnected");
        } else {
            debug!(connection = %connection, "Connection closed");
        }

        removed
    }

    /// Current state of a connection.
    #[must_use]
    pub fn state(&self, connection: &ConnectionId) -> ConnectionState {
        self.hub
            .connections
            .get(connection)
            .map(|entry| entry.state.clone())
            .unwrap_or(ConnectionState::Closed)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.connections.len()
    }
}
