//! Message router.
//!
//! Routes private messages and payment handshake steps from one identity to
//! another. Delivery is best-effort: one attempt, no acknowledgment, no
//! retry. Failures are reported to the originating connection as an
//! `errorMessage` and returned to the caller.

use crate::connection::{ConnectionId, DeliveryError};
use crate::error::RouteError;
use crate::hub::Hub;
use crate::log::MessageLogEntry;
use crate::payment::{PaymentStage, PaymentStep};
use courier_protocol::{ClientEvent, Identity, ServerEvent};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Events queued across all recipients.
    pub delivered: usize,
    /// Payment stage reached, for handshake steps.
    pub stage: Option<PaymentStage>,
}

impl RouteOutcome {
    fn delivered(delivered: usize) -> Self {
        Self {
            delivered,
            stage: None,
        }
    }
}

/// Routes client events between identities.
#[derive(Clone)]
pub struct MessageRouter {
    hub: Arc<Hub>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Route an event received on `origin`.
    ///
    /// Registration is the lifecycle manager's job and is ignored here.
    ///
    /// # Errors
    ///
    /// Returns the [`RouteError`] that was reported to `origin`.
    pub fn route(
        &self,
        origin: &ConnectionId,
        event: ClientEvent,
    ) -> Result<RouteOutcome, RouteError> {
        let result = match event {
            ClientEvent::Register(_) => {
                warn!(connection = %origin, "Register event passed to router");
                Ok(RouteOutcome::delivered(0))
            }
            ClientEvent::SendPrivateMessage { to, message, from } => self
                .send_private_message(&from, &to, message)
                .map(RouteOutcome::delivered),
            event => self.payment_step(event),
        };

        if let Err(e) = &result {
            self.report(origin, e);
        }
        result
    }

    /// Deliver a private message and log it.
    fn send_private_message(
        &self,
        from: &str,
        to: &str,
        message: String,
    ) -> Result<usize, RouteError> {
        let mut directory = self.hub.lock();

        let target = directory
            .registry
            .lookup(to)
            .cloned()
            .ok_or_else(|| RouteError::RecipientOffline(to.to_string()))?;

        self.hub
            .deliver(
                &target,
                ServerEvent::ReceivePrivateMessage {
                    from: from.to_string(),
                    message: message.clone(),
                },
            )
            .map_err(|e| delivery_error(to, e))?;

        directory.log.push(MessageLogEntry::new(from, to, message));
        debug!(from = %from, to = %to, "Private message delivered");
        Ok(1)
    }

    /// Validate, forward and commit a payment handshake step.
    fn payment_step(&self, event: ClientEvent) -> Result<RouteOutcome, RouteError> {
        let Some(step) = PaymentStep::from_event(&event) else {
            return Ok(RouteOutcome::delivered(0));
        };
        let Some((from, to)) = event.parties().map(|(f, t)| (f.to_string(), t.to_string()))
        else {
            return Ok(RouteOutcome::delivered(0));
        };

        let now = Instant::now();
        let mut directory = self.hub.lock();

        let transition = directory.sessions.plan(&from, &to, step, now)?;
        let target = directory
            .registry
            .lookup(&to)
            .cloned()
            .ok_or_else(|| RouteError::RecipientOffline(to.clone()))?;

        let config = directory.sessions.config().clone();
        let forwarded = match event {
            ClientEvent::AskAvailability { .. } => {
                vec![ServerEvent::ReceiveAvailabilityRequest { from: from.clone() }]
            }
            ClientEvent::AvailabilityResponse { response, .. } => {
                vec![ServerEvent::ReceiveAvailabilityResponse {
                    from: from.clone(),
                    response,
                }]
            }
            ClientEvent::AskPaymentDetails { .. } => {
                vec![ServerEvent::ReceiveAskForBankDetails { from: from.clone() }]
            }
            ClientEvent::SendBankDetails { bank_details, .. } => vec![
                ServerEvent::ReceiveBankDetails {
                    from: from.clone(),
                    bank_details,
                },
                ServerEvent::StartPaymentTimer {
                    from: from.clone(),
                    duration: config.timer.as_secs(),
                },
                ServerEvent::ShowSendReceiptButton {
                    delay: config.receipt_button_delay.as_secs(),
                },
            ],
            ClientEvent::SendReceipt { .. } => vec![ServerEvent::payment_receipt(from.clone())],
            ClientEvent::ConfirmPaymentStatus { status, .. } => {
                if status.is_yes() {
                    vec![ServerEvent::payment_confirmed(from.clone())]
                } else {
                    vec![ServerEvent::payment_conflict(from.clone())]
                }
            }
            ClientEvent::Register(_) | ClientEvent::SendPrivateMessage { .. } => Vec::new(),
        };

        let mut delivered = self
            .hub
            .deliver_all(&target, forwarded)
            .map_err(|e| delivery_error(&to, e))?;

        let stage = transition.next();
        directory.sessions.apply(transition);

        // Both parties hear about a conflict, each naming the other.
        if stage == PaymentStage::Conflicted {
            if let Some(sender) = directory.registry.lookup(&from).cloned() {
                match self.hub.deliver(&sender, ServerEvent::payment_conflict(to.clone())) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(identity = %from, error = %e, "Conflict notice to sender dropped"),
                }
            }
        }

        debug!(from = %from, to = %to, step = step.name(), stage = %stage, "Payment step routed");
        Ok(RouteOutcome {
            delivered,
            stage: Some(stage),
        })
    }

    /// Drop payment sessions past their deadline or idle timeout.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.hub.lock().sessions.sweep_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "Swept expired payment sessions");
        }
        removed
    }

    /// Send an error back to the originating connection.
    fn report(&self, origin: &ConnectionId, error: &RouteError) {
        debug!(connection = %origin, kind = error.kind(), error = %error, "Routing failed");
        if let Err(e) = self.hub.deliver(origin, ServerEvent::error(error.to_string())) {
            warn!(connection = %origin, error = %e, "Could not report routing error");
        }
    }
}

fn delivery_error(to: &str, error: DeliveryError) -> RouteError {
    let to: Identity = to.to_string();
    match error {
        DeliveryError::QueueFull => RouteError::DeliveryFailed(to),
        DeliveryError::Closed => RouteError::RecipientOffline(to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::hub::HubConfig;
    use crate::lifecycle::Lifecycle;
    use courier_protocol::Answer;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        hub: Arc<Hub>,
        lifecycle: Lifecycle,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(HubConfig::default())
        }

        fn with_config(config: HubConfig) -> Self {
            let hub = Arc::new(Hub::with_config(config));
            Self {
                lifecycle: Lifecycle::new(hub.clone()),
                router: MessageRouter::new(hub.clone()),
                hub,
            }
        }

        /// Open and register a connection, discarding the user list broadcasts.
        fn user(
            &self,
            identity: &str,
        ) -> (ConnectionHandle<ServerEvent>, mpsc::Receiver<ServerEvent>) {
            let (handle, rx) = self.lifecycle.open();
            self.lifecycle.register(handle.id(), identity);
            (handle, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, ServerEvent::UserListUpdate(_)) {
                events.push(event);
            }
        }
        events
    }

    fn private(from: &str, to: &str, message: &str) -> ClientEvent {
        ClientEvent::SendPrivateMessage {
            to: to.into(),
            message: message.into(),
            from: from.into(),
        }
    }

    #[test]
    fn test_private_message_delivered_and_logged() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");
        let (_c2, mut rx2) = fx.user("u2");

        let outcome = fx.router.route(c1.id(), private("u1", "u2", "hi")).unwrap();
        assert_eq!(outcome.delivered, 1);

        assert_eq!(
            drain(&mut rx2),
            vec![ServerEvent::ReceivePrivateMessage {
                from: "u1".into(),
                message: "hi".into(),
            }]
        );
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(
            fx.hub.snapshot().message_log,
            vec![MessageLogEntry::new("u1", "u2", "hi")]
        );
    }

    #[test]
    fn test_private_message_to_offline_user() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");

        let err = fx.router.route(c1.id(), private("u1", "u2", "hi")).unwrap_err();
        assert_eq!(err, RouteError::RecipientOffline("u2".into()));

        assert_eq!(
            drain(&mut rx1),
            vec![ServerEvent::error("User u2 is not online.")]
        );
        assert!(fx.hub.snapshot().message_log.is_empty());
    }

    #[test]
    fn test_error_goes_to_origin_connection() {
        let fx = Fixture::new();
        let (_c1, mut rx1) = fx.user("u1");
        let (anonymous, mut rx_anon) = fx.lifecycle.open();

        // The claimed sender is u1, but the error belongs to the socket that sent it.
        fx.router
            .route(anonymous.id(), private("u1", "nobody", "hi"))
            .unwrap_err();

        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx_anon).len(), 1);
    }

    #[test]
    fn test_full_queue_reports_delivery_failure() {
        let fx = Fixture::with_config(HubConfig {
            outbound_queue_capacity: 4,
            ..HubConfig::default()
        });
        let (c1, mut rx1) = fx.user("u1");
        let (_c2, rx2) = fx.user("u2");
        drain(&mut rx1);
        // u2's queue already holds the user list update from its own registration.
        let mut accepted = 0;
        let mut failed = None;
        for i in 0..10 {
            match fx.router.route(c1.id(), private("u1", "u2", &i.to_string())) {
                Ok(_) => accepted += 1,
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }

        assert!(accepted < 4);
        assert_eq!(failed, Some(RouteError::DeliveryFailed("u2".into())));
        assert_eq!(fx.hub.snapshot().message_log.len(), accepted);
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerEvent::ErrorMessage(_)]
        ));
        drop(rx2);
    }

    #[test]
    fn test_tiny_queue_still_fits_bank_details() {
        let fx = Fixture::with_config(HubConfig {
            outbound_queue_capacity: 1,
            ..HubConfig::default()
        });
        assert_eq!(fx.hub.config().outbound_queue_capacity, 3);

        let (c1, mut rx1) = fx.user("u1");
        let (c2, mut rx2) = fx.user("u2");
        let steps = [
            (&c1, ClientEvent::AskAvailability { from: "u1".into(), to: "u2".into() }),
            (
                &c2,
                ClientEvent::AvailabilityResponse {
                    from: "u2".into(),
                    to: "u1".into(),
                    response: Answer::Yes,
                },
            ),
            (&c2, ClientEvent::AskPaymentDetails { from: "u2".into(), to: "u1".into() }),
            (
                &c1,
                ClientEvent::SendBankDetails {
                    from: "u1".into(),
                    to: "u2".into(),
                    bank_details: json!({"account": "0001"}),
                },
            ),
        ];
        for (origin, event) in steps {
            drain(&mut rx1);
            drain(&mut rx2);
            fx.router.route(origin.id(), event).unwrap();
        }

        assert_eq!(drain(&mut rx2).len(), 3);
        assert!(matches!(
            fx.hub.lock().sessions.get("u1", "u2").map(|s| s.stage()),
            Some(PaymentStage::TimerArmed { .. })
        ));
    }

    #[test]
    fn test_per_target_order_preserved() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.user("u1");
        let (_c2, mut rx2) = fx.user("u2");

        for i in 0..20 {
            fx.router
                .route(c1.id(), private("u1", "u2", &i.to_string()))
                .unwrap();
        }

        let received: Vec<String> = drain(&mut rx2)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::ReceivePrivateMessage { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    fn handshake_to_receipt(
        fx: &Fixture,
        c1: &ConnectionId,
        c2: &ConnectionId,
    ) {
        let steps = [
            (c1, ClientEvent::AskAvailability { from: "u1".into(), to: "u2".into() }),
            (
                c2,
                ClientEvent::AvailabilityResponse {
                    from: "u2".into(),
                    to: "u1".into(),
                    response: Answer::Yes,
                },
            ),
            (c2, ClientEvent::AskPaymentDetails { from: "u2".into(), to: "u1".into() }),
            (
                c1,
                ClientEvent::SendBankDetails {
                    from: "u1".into(),
                    to: "u2".into(),
                    bank_details: json!({"account": "0001"}),
                },
            ),
            (c2, ClientEvent::SendReceipt { from: "u2".into(), to: "u1".into() }),
        ];
        for (origin, event) in steps {
            fx.router.route(origin, event).unwrap();
        }
    }

    #[test]
    fn test_payment_happy_path() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");
        let (c2, mut rx2) = fx.user("u2");

        handshake_to_receipt(&fx, c1.id(), c2.id());

        assert_eq!(
            drain(&mut rx2),
            vec![
                ServerEvent::ReceiveAvailabilityRequest { from: "u1".into() },
                ServerEvent::ReceiveBankDetails {
                    from: "u1".into(),
                    bank_details: json!({"account": "0001"}),
                },
                ServerEvent::StartPaymentTimer {
                    from: "u1".into(),
                    duration: 300,
                },
                ServerEvent::ShowSendReceiptButton { delay: 20 },
            ]
        );
        assert_eq!(
            drain(&mut rx1),
            vec![
                ServerEvent::ReceiveAvailabilityResponse {
                    from: "u2".into(),
                    response: Answer::Yes,
                },
                ServerEvent::ReceiveAskForBankDetails { from: "u2".into() },
                ServerEvent::payment_receipt("u2"),
            ]
        );

        let outcome = fx
            .router
            .route(
                c1.id(),
                ClientEvent::ConfirmPaymentStatus {
                    from: "u1".into(),
                    to: "u2".into(),
                    status: Answer::Yes,
                },
            )
            .unwrap();

        assert_eq!(outcome.stage, Some(PaymentStage::Confirmed));
        assert_eq!(drain(&mut rx2), vec![ServerEvent::payment_confirmed("u1")]);
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(fx.hub.stats().sessions, 0);
    }

    #[test]
    fn test_payment_conflict_notifies_both() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");
        let (c2, mut rx2) = fx.user("u2");

        handshake_to_receipt(&fx, c1.id(), c2.id());
        drain(&mut rx1);
        drain(&mut rx2);

        let outcome = fx
            .router
            .route(
                c1.id(),
                ClientEvent::ConfirmPaymentStatus {
                    from: "u1".into(),
                    to: "u2".into(),
                    status: Answer::No,
                },
            )
            .unwrap();

        assert_eq!(outcome.stage, Some(PaymentStage::Conflicted));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(drain(&mut rx2), vec![ServerEvent::payment_conflict("u1")]);
        assert_eq!(drain(&mut rx1), vec![ServerEvent::payment_conflict("u2")]);
    }

    #[test]
    fn test_bank_details_before_request_rejected() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");
        let (_c2, mut rx2) = fx.user("u2");

        let err = fx
            .router
            .route(
                c1.id(),
                ClientEvent::SendBankDetails {
                    from: "u1".into(),
                    to: "u2".into(),
                    bank_details: json!("acct"),
                },
            )
            .unwrap_err();

        assert!(matches!(err, RouteError::InvalidTransition { .. }));
        assert!(drain(&mut rx2).is_empty());
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerEvent::ErrorMessage(_)]
        ));
    }

    #[test]
    fn test_payment_step_to_offline_user_keeps_session() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");

        let err = fx
            .router
            .route(
                c1.id(),
                ClientEvent::AskAvailability {
                    from: "u1".into(),
                    to: "u2".into(),
                },
            )
            .unwrap_err();

        assert_eq!(err, RouteError::RecipientOffline("u2".into()));
        assert_eq!(
            drain(&mut rx1),
            vec![ServerEvent::error("User u2 is not online.")]
        );
        assert_eq!(fx.hub.stats().sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_after_deadline() {
        let fx = Fixture::new();
        let (c1, mut rx1) = fx.user("u1");
        let (c2, mut rx2) = fx.user("u2");

        for (origin, event) in [
            (c1.id(), ClientEvent::AskAvailability { from: "u1".into(), to: "u2".into() }),
            (
                c2.id(),
                ClientEvent::AvailabilityResponse {
                    from: "u2".into(),
                    to: "u1".into(),
                    response: Answer::Yes,
                },
            ),
            (c2.id(), ClientEvent::AskPaymentDetails { from: "u2".into(), to: "u1".into() }),
            (
                c1.id(),
                ClientEvent::SendBankDetails {
                    from: "u1".into(),
                    to: "u2".into(),
                    bank_details: json!({}),
                },
            ),
        ] {
            fx.router.route(origin, event).unwrap();
        }
        drain(&mut rx1);
        drain(&mut rx2);

        tokio::time::advance(Duration::from_secs(301)).await;

        let err = fx
            .router
            .route(
                c2.id(),
                ClientEvent::SendReceipt {
                    from: "u2".into(),
                    to: "u1".into(),
                },
            )
            .unwrap_err();

        assert_eq!(err, RouteError::SessionExpired("u1".into()));
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(fx.hub.stats().sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired_sessions() {
        let fx = Fixture::new();
        let (c1, _rx1) = fx.user("u1");
        let (_c2, _rx2) = fx.user("u2");

        fx.router
            .route(
                c1.id(),
                ClientEvent::AskAvailability {
                    from: "u1".into(),
                    to: "u2".into(),
                },
            )
            .unwrap();
        assert_eq!(fx.router.sweep_expired(), 0);

        tokio::time::advance(Duration::from_secs(901)).await;
        assert_eq!(fx.router.sweep_expired(), 1);
    }
}
