//! Payment handshake state machine.
//!
//! A negotiation between two identities runs through six steps:
//!
//! ```text
//! askAvailability ─▶ AwaitingAvailability ─(yes)─▶ Available ─▶ askPaymentDetails
//!                                          └(no)──▶ Declined
//! AwaitingBankDetails ─sendBankDetails─▶ TimerArmed ─sendReceipt─▶ ReceiptSent
//! ReceiptSent ─confirmPaymentStatus(yes)─▶ Confirmed
//!             └confirmPaymentStatus(no)──▶ Conflicted
//! ```
//!
//! Sessions are keyed by the unordered pair of parties. Steps are validated
//! with [`PaymentSessions::plan`] and committed with
//! [`PaymentSessions::apply`] only once the forwarded events were queued, so
//! a rejected or undeliverable step never changes the session.

use crate::error::RouteError;
use courier_protocol::{Answer, ClientEvent, Identity};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default payment window, in seconds.
pub const DEFAULT_TIMER_SECS: u64 = 300;

/// Default delay before the client reveals the receipt button, in seconds.
pub const DEFAULT_RECEIPT_BUTTON_DELAY_SECS: u64 = 20;

/// Default idle time after which an unfinished session is dropped, in seconds.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 900;

/// Payment handshake configuration.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Window between bank details and receipt.
    pub timer: Duration,
    /// Advisory delay sent to the paying client.
    pub receipt_button_delay: Duration,
    /// Idle timeout for sessions that are not waiting on the payment timer.
    pub session_idle: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            timer: Duration::from_secs(DEFAULT_TIMER_SECS),
            receipt_button_delay: Duration::from_secs(DEFAULT_RECEIPT_BUTTON_DELAY_SECS),
            session_idle: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        }
    }
}

/// Where a negotiation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStage {
    AwaitingAvailability,
    Available,
    Declined,
    AwaitingBankDetails,
    TimerArmed { deadline: Instant },
    ReceiptSent,
    Confirmed,
    Conflicted,
}

impl PaymentStage {
    /// Whether the negotiation is over.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStage::Declined | PaymentStage::Confirmed | PaymentStage::Conflicted
        )
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PaymentStage::AwaitingAvailability => "AwaitingAvailability",
            PaymentStage::Available => "Available",
            PaymentStage::Declined => "Declined",
            PaymentStage::AwaitingBankDetails => "AwaitingBankDetails",
            PaymentStage::TimerArmed { .. } => "TimerArmed",
            PaymentStage::ReceiptSent => "ReceiptSent",
            PaymentStage::Confirmed => "Confirmed",
            PaymentStage::Conflicted => "Conflicted",
        }
    }
}

impl fmt::Display for PaymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A handshake step, as carried by a client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStep {
    AskAvailability,
    AvailabilityResponse(Answer),
    AskPaymentDetails,
    SendBankDetails,
    SendReceipt,
    ConfirmPaymentStatus(Answer),
}

impl PaymentStep {
    /// Extract the step from a client event, `None` for non-payment events.
    #[must_use]
    pub fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::AskAvailability { .. } => Some(PaymentStep::AskAvailability),
            ClientEvent::AvailabilityResponse { response, .. } => {
                Some(PaymentStep::AvailabilityResponse(*response))
            }
            ClientEvent::AskPaymentDetails { .. } => Some(PaymentStep::AskPaymentDetails),
            ClientEvent::SendBankDetails { .. } => Some(PaymentStep::SendBankDetails),
            ClientEvent::SendReceipt { .. } => Some(PaymentStep::SendReceipt),
            ClientEvent::ConfirmPaymentStatus { status, .. } => {
                Some(PaymentStep::ConfirmPaymentStatus(*status))
            }
            ClientEvent::Register(_) | ClientEvent::SendPrivateMessage { .. } => None,
        }
    }

    /// Wire name of the step's event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PaymentStep::AskAvailability => "askAvailability",
            PaymentStep::AvailabilityResponse(_) => "availabilityResponse",
            PaymentStep::AskPaymentDetails => "askPaymentDetails",
            PaymentStep::SendBankDetails => "sendBankDetails",
            PaymentStep::SendReceipt => "sendReceipt",
            PaymentStep::ConfirmPaymentStatus(_) => "confirmPaymentStatus",
        }
    }
}

/// Unordered pair of parties identifying a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(Identity, Identity);

impl SessionKey {
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// A negotiation in progress.
#[derive(Debug, Clone)]
pub struct PaymentSession {
    requester: Identity,
    stage: PaymentStage,
    /// Party whose answer the session is waiting on, if any.
    expected_actor: Option<Identity>,
    last_activity: Instant,
}

impl PaymentSession {
    /// Sender of the opening `askAvailability`.
    #[must_use]
    pub fn requester(&self) -> &str {
        &self.requester
    }

    #[must_use]
    pub fn stage(&self) -> PaymentStage {
        self.stage
    }

    fn is_stale(&self, now: Instant, idle: Duration) -> bool {
        match self.stage {
            PaymentStage::TimerArmed { deadline } => now >= deadline,
            _ => now.saturating_duration_since(self.last_activity) > idle,
        }
    }
}

/// A validated step, ready to be committed.
#[derive(Debug, Clone)]
pub struct Transition {
    key: SessionKey,
    from: Identity,
    to: Identity,
    step: PaymentStep,
    next: PaymentStage,
    now: Instant,
}

impl Transition {
    /// Stage the session moves to.
    #[must_use]
    pub fn next(&self) -> PaymentStage {
        self.next
    }
}

/// All live payment sessions.
#[derive(Debug, Default)]
pub struct PaymentSessions {
    sessions: HashMap<SessionKey, PaymentSession>,
    config: PaymentConfig,
}

impl PaymentSessions {
    #[must_use]
    pub fn new(config: PaymentConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Validate `step` sent by `from` to `to` at `now`.
    ///
    /// Stale sessions for the pair are dropped first. A `sendReceipt` that
    /// arrives after the payment deadline fails with
    /// [`RouteError::SessionExpired`].
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidTransition`] when the step does not follow
    /// the session's current stage or comes from the wrong party.
    pub fn plan(
        &mut self,
        from: &str,
        to: &str,
        step: PaymentStep,
        now: Instant,
    ) -> Result<Transition, RouteError> {
        let key = SessionKey::new(from, to);

        if let Some(session) = self.sessions.get(&key) {
            if session.is_stale(now, self.config.session_idle) {
                let expired_timer = matches!(session.stage, PaymentStage::TimerArmed { .. });
                self.sessions.remove(&key);
                debug!(from = %from, to = %to, "Dropped stale payment session");

                if expired_timer && step == PaymentStep::SendReceipt {
                    return Err(RouteError::SessionExpired(to.to_string()));
                }
            }
        }

        let invalid = |reason: String| RouteError::InvalidTransition {
            step: step.name(),
            reason,
        };

        let next = match (step, self.sessions.get(&key)) {
            (PaymentStep::AskAvailability, None) => PaymentStage::AwaitingAvailability,
            (PaymentStep::AskAvailability, Some(session)) => {
                return Err(invalid(format!(
                    "payment with {} is already {}",
                    to, session.stage
                )));
            }
            (_, None) => return Err(invalid(format!("no payment in progress with {}", to))),
            (step, Some(session)) => {
                if let Some(expected) = &session.expected_actor {
                    if expected != from {
                        return Err(invalid(format!("waiting on {}", expected)));
                    }
                }

                match (step, session.stage) {
                    (PaymentStep::AvailabilityResponse(answer), PaymentStage::AwaitingAvailability) => {
                        if answer.is_yes() {
                            PaymentStage::Available
                        } else {
                            PaymentStage::Declined
                        }
                    }
                    (PaymentStep::AskPaymentDetails, PaymentStage::Available) => {
                        PaymentStage::AwaitingBankDetails
                    }
                    (PaymentStep::SendBankDetails, PaymentStage::AwaitingBankDetails) => {
                        PaymentStage::TimerArmed {
                            deadline: now + self.config.timer,
                        }
                    }
                    (PaymentStep::SendReceipt, PaymentStage::TimerArmed { .. }) => {
                        PaymentStage::ReceiptSent
                    }
                    (PaymentStep::ConfirmPaymentStatus(answer), PaymentStage::ReceiptSent) => {
                        if answer.is_yes() {
                            PaymentStage::Confirmed
                        } else {
                            PaymentStage::Conflicted
                        }
                    }
                    (_, stage) => {
                        return Err(invalid(format!("payment with {} is {}", to, stage)));
                    }
                }
            }
        };

        Ok(Transition {
            key,
            from: from.to_string(),
            to: to.to_string(),
            step,
            next,
            now,
        })
    }

    /// Commit a transition returned by [`plan`](Self::plan).
    ///
    /// Terminal stages destroy the session.
    pub fn apply(&mut self, transition: Transition) {
        let Transition {
            key,
            from,
            to,
            step,
            next,
            now,
        } = transition;

        if next.is_terminal() {
            self.sessions.remove(&key);
            debug!(from = %from, to = %to, stage = %next, "Payment session finished");
            return;
        }

        // An answered availability request leaves the next move open.
        let expected_actor = match step {
            PaymentStep::AvailabilityResponse(_) => None,
            _ => Some(to.clone()),
        };

        match self.sessions.get_mut(&key) {
            Some(session) => {
                session.stage = next;
                session.expected_actor = expected_actor;
                session.last_activity = now;
            }
            None => {
                self.sessions.insert(
                    key,
                    PaymentSession {
                        requester: from,
                        stage: next,
                        expected_actor,
                        last_activity: now,
                    },
                );
            }
        }
    }

    /// The session between two parties, in either order.
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<&PaymentSession> {
        self.sessions.get(&SessionKey::new(a, b))
    }

    /// Drop every session past its deadline or idle timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let idle = self.config.session_idle;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_stale(now, idle));
        before - self.sessions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(
        sessions: &mut PaymentSessions,
        from: &str,
        to: &str,
        step: PaymentStep,
        now: Instant,
    ) -> Result<PaymentStage, RouteError> {
        let transition = sessions.plan(from, to, step, now)?;
        let next = transition.next();
        sessions.apply(transition);
        Ok(next)
    }

    fn run_to_receipt(sessions: &mut PaymentSessions, now: Instant) {
        step(sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        step(sessions, "u2", "u1", PaymentStep::AvailabilityResponse(Answer::Yes), now).unwrap();
        step(sessions, "u2", "u1", PaymentStep::AskPaymentDetails, now).unwrap();
        step(sessions, "u1", "u2", PaymentStep::SendBankDetails, now).unwrap();
        step(sessions, "u2", "u1", PaymentStep::SendReceipt, now).unwrap();
    }

    #[test]
    fn test_happy_path_confirmed() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        run_to_receipt(&mut sessions, now);
        assert_eq!(sessions.get("u1", "u2").unwrap().stage(), PaymentStage::ReceiptSent);
        assert_eq!(sessions.get("u2", "u1").unwrap().requester(), "u1");

        let stage = step(
            &mut sessions,
            "u1",
            "u2",
            PaymentStep::ConfirmPaymentStatus(Answer::Yes),
            now,
        )
        .unwrap();
        assert_eq!(stage, PaymentStage::Confirmed);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_declined_is_terminal() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        let stage = step(
            &mut sessions,
            "u2",
            "u1",
            PaymentStep::AvailabilityResponse(Answer::No),
            now,
        )
        .unwrap();

        assert_eq!(stage, PaymentStage::Declined);
        assert!(sessions.get("u1", "u2").is_none());
    }

    #[test]
    fn test_out_of_order_step_leaves_session_untouched() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        let err = sessions
            .plan("u1", "u2", PaymentStep::SendBankDetails, now)
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidTransition { step: "sendBankDetails", .. }));

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        let err = sessions
            .plan("u2", "u1", PaymentStep::SendReceipt, now)
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidTransition { .. }));
        assert_eq!(
            sessions.get("u1", "u2").unwrap().stage(),
            PaymentStage::AwaitingAvailability
        );
    }

    #[test]
    fn test_response_must_come_from_asked_party() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        let err = sessions
            .plan("u1", "u2", PaymentStep::AvailabilityResponse(Answer::Yes), now)
            .unwrap_err();

        assert_eq!(
            err,
            RouteError::InvalidTransition {
                step: "availabilityResponse",
                reason: "waiting on u2".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_ask_rejected() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        assert!(sessions
            .plan("u2", "u1", PaymentStep::AskAvailability, now)
            .is_err());
    }

    #[test]
    fn test_receipt_after_deadline_expires_session() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        step(&mut sessions, "u2", "u1", PaymentStep::AvailabilityResponse(Answer::Yes), now).unwrap();
        step(&mut sessions, "u2", "u1", PaymentStep::AskPaymentDetails, now).unwrap();
        step(&mut sessions, "u1", "u2", PaymentStep::SendBankDetails, now).unwrap();

        let late = now + Duration::from_secs(DEFAULT_TIMER_SECS + 1);
        let err = sessions
            .plan("u2", "u1", PaymentStep::SendReceipt, late)
            .unwrap_err();

        assert_eq!(err, RouteError::SessionExpired("u1".to_string()));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_idle_session_can_restart() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();

        let later = now + Duration::from_secs(DEFAULT_SESSION_IDLE_SECS + 1);
        assert_eq!(
            step(&mut sessions, "u2", "u1", PaymentStep::AskAvailability, later).unwrap(),
            PaymentStage::AwaitingAvailability
        );
        assert_eq!(sessions.get("u1", "u2").unwrap().requester(), "u2");
    }

    #[test]
    fn test_sweep_expired() {
        let mut sessions = PaymentSessions::default();
        let now = Instant::now();

        step(&mut sessions, "u1", "u2", PaymentStep::AskAvailability, now).unwrap();
        step(&mut sessions, "u3", "u4", PaymentStep::AskAvailability, now).unwrap();
        step(&mut sessions, "u4", "u3", PaymentStep::AvailabilityResponse(Answer::Yes), now).unwrap();
        step(&mut sessions, "u4", "u3", PaymentStep::AskPaymentDetails, now).unwrap();
        step(&mut sessions, "u3", "u4", PaymentStep::SendBankDetails, now).unwrap();

        assert_eq!(sessions.sweep_expired(now + Duration::from_secs(10)), 0);
        assert_eq!(
            sessions.sweep_expired(now + Duration::from_secs(DEFAULT_TIMER_SECS)),
            1
        );
        assert!(sessions.get("u3", "u4").is_none());
        assert!(sessions.get("u1", "u2").is_some());
    }
}
