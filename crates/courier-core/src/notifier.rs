//! Payment notifier.
//!
//! A minimal surface next to the main relay: clients register an identity on
//! a raw socket and receive `payment_success` pushes when an upstream payment
//! status source reports a completed payment for them. It keeps its own
//! [`Registry`] and has no messaging or handshake support.

use crate::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use crate::error::RouteError;
use crate::registry::Registry;
use async_trait::async_trait;
use courier_protocol::{Identity, NotifierFrame};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default poll interval, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// A payment result reported by an upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    /// The user who requested the payment and gets notified.
    pub requester_user_id: Identity,
    /// The user who paid.
    pub payer_user_id: Identity,
    pub amount: u64,
}

/// Payment status source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Payment status source unavailable: {0}")]
    Unavailable(String),
}

/// An upstream that can be polled for payment results.
#[async_trait]
pub trait PaymentStatusSource: Send + Sync {
    /// Fetch the latest result, if any.
    async fn poll(&self) -> Result<Option<PaymentResult>, SourceError>;

    /// Source name for logging.
    fn name(&self) -> &'static str;
}

/// A source that reports the same successful payment on every poll.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentSource {
    result: PaymentResult,
}

impl SimulatedPaymentSource {
    #[must_use]
    pub fn new(requester: impl Into<Identity>, payer: impl Into<Identity>, amount: u64) -> Self {
        Self {
            result: PaymentResult {
                success: true,
                requester_user_id: requester.into(),
                payer_user_id: payer.into(),
                amount,
            },
        }
    }
}

#[async_trait]
impl PaymentStatusSource for SimulatedPaymentSource {
    async fn poll(&self) -> Result<Option<PaymentResult>, SourceError> {
        Ok(Some(self.result.clone()))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Registry and connections of the notifier surface.
#[derive(Default)]
pub struct Notifier {
    registry: Mutex<Registry>,
    connections: DashMap<ConnectionId, ConnectionHandle<NotifierFrame>>,
    pushes: AtomicU64,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected socket.
    pub fn connect(&self, handle: ConnectionHandle<NotifierFrame>) {
        debug!(connection = %handle.id(), "Notifier connection opened");
        self.connections.insert(handle.id().clone(), handle);
    }

    /// Register an identity and acknowledge it on the same connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the acknowledgment could not be queued.
    pub fn register(&self, connection: &ConnectionId, identity: &str) -> Result<(), DeliveryError> {
        let registry = &mut *self.registry.lock();
        let handle = self
            .connections
            .get(connection)
            .ok_or(DeliveryError::Closed)?;

        registry.register(identity, connection.clone());
        info!(connection = %connection, identity = %identity, "Notifier user registered");

        handle.deliver(NotifierFrame::registered(identity))
    }

    /// Drop a connection and whatever identity it held.
    pub fn disconnect(&self, connection: &ConnectionId) -> Option<Identity> {
        let removed = self.registry.lock().unregister_by_connection(connection);
        self.connections.remove(connection);
        if let Some(identity) = &removed {
            info!(connection = %connection, identity = %identity, "Notifier user disconnected");
        }
        removed
    }

    /// Push a payment result to its requester.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::RecipientOffline`] if the requester is not
    /// registered and [`RouteError::DeliveryFailed`] if its queue is full.
    pub fn notify(&self, result: &PaymentResult) -> Result<(), RouteError> {
        let requester = &result.requester_user_id;
        let registry = self.registry.lock();

        let offline = || RouteError::RecipientOffline(requester.clone());
        let connection = registry.lookup(requester).ok_or_else(offline)?;
        let handle = self.connections.get(connection).ok_or_else(offline)?;

        handle
            .deliver(NotifierFrame::payment_success(
                result.payer_user_id.clone(),
                result.amount,
            ))
            .map_err(|e| match e {
                DeliveryError::QueueFull => RouteError::DeliveryFailed(requester.clone()),
                DeliveryError::Closed => offline(),
            })?;

        self.pushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Payment success notifications queued since start.
    #[must_use]
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }

    /// Registered identities.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        self.registry.lock().identities()
    }

    /// Number of live notifier connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Poll `source` once and push a successful result.
///
/// Returns `true` if a notification was queued. Failures are logged, never
/// retried.
pub async fn poll_once(notifier: &Notifier, source: &dyn PaymentStatusSource) -> bool {
    let result = match source.poll().await {
        Ok(Some(result)) if result.success => result,
        Ok(_) => return false,
        Err(e) => {
            warn!(source = source.name(), error = %e, "Payment status poll failed");
            return false;
        }
    };

    match notifier.notify(&result) {
        Ok(()) => {
            debug!(requester = %result.requester_user_id, amount = result.amount, "Payment success sent");
            true
        }
        Err(RouteError::RecipientOffline(requester)) => {
            debug!(requester = %requester, "Requester not connected");
            false
        }
        Err(e) => {
            warn!(requester = %result.requester_user_id, error = %e, "Payment success dropped");
            false
        }
    }
}

/// Poll `source` on a fixed interval until the task is dropped.
pub async fn run_poller(
    notifier: Arc<Notifier>,
    source: Arc<dyn PaymentStatusSource>,
    interval: Duration,
) {
    info!(source = source.name(), interval_ms = interval.as_millis() as u64, "Payment poller started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        poll_once(&notifier, source.as_ref()).await;
    }
}
