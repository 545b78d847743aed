//! Identity registry.
//!
//! Maps logical identities to the connection currently serving them. The
//! registry keeps a reverse index so that both directions stay one-to-one:
//! an identity has at most one connection and a connection has at most one
//! identity.
//!
//! The registry itself is not synchronized. Owners keep it behind a single
//! lock so that the purge-then-insert of [`Registry::register`] is atomic.

use crate::connection::ConnectionId;
use courier_protocol::Identity;
use std::collections::HashMap;
use tracing::debug;

/// What a registration changed besides inserting the new mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rebinding {
    /// Identity the connection was registered under before, if different.
    pub previous_identity: Option<Identity>,
    /// Connection that held the identity before and has now lost it.
    pub displaced: Option<ConnectionId>,
}

/// Authoritative identity to connection mapping.
#[derive(Debug, Default)]
pub struct Registry {
    by_identity: HashMap<Identity, ConnectionId>,
    by_connection: HashMap<ConnectionId, Identity>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`.
    ///
    /// Any identity previously bound to `connection` is purged first, and a
    /// different connection previously holding `identity` loses it.
    pub fn register(&mut self, identity: impl Into<Identity>, connection: ConnectionId) -> Rebinding {
        let identity = identity.into();

        let previous_identity = self.by_connection.remove(&connection);
        if let Some(previous) = &previous_identity {
            if self.by_identity.get(previous) == Some(&connection) {
                self.by_identity.remove(previous);
            }
        }

        let displaced = self
            .by_identity
            .insert(identity.clone(), connection.clone())
            .filter(|old| *old != connection);
        if let Some(old) = &displaced {
            self.by_connection.remove(old);
            debug!(identity = %identity, displaced = %old, "Identity rebound to new connection");
        }

        self.by_connection.insert(connection, identity.clone());

        Rebinding {
            previous_identity: previous_identity.filter(|previous| *previous != identity),
            displaced,
        }
    }

    /// Look up the connection serving `identity`.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<&ConnectionId> {
        self.by_identity.get(identity)
    }

    /// Look up the identity registered on `connection`.
    #[must_use]
    pub fn identity_of(&self, connection: &ConnectionId) -> Option<&str> {
        self.by_connection.get(connection).map(String::as_str)
    }

    /// Remove whatever identity is registered on `connection`.
    ///
    /// Returns the removed identity. Removing an unregistered connection is a
    /// no-op.
    pub fn unregister_by_connection(&mut self, connection: &ConnectionId) -> Option<Identity> {
        let identity = self.by_connection.remove(connection)?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    /// Sorted snapshot of registered identities.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.by_identity.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    /// Whether no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.by_identity.len() == self.by_connection.len()
            && self
                .by_identity
                .iter()
                .all(|(id, conn)| self.by_connection.get(conn) == Some(id))
    }
}
