//! Routing errors.
//!
//! Every variant is recoverable and reported only to the connection that
//! sent the offending event.

use courier_protocol::Identity;
use thiserror::Error;

/// Errors produced while routing an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The target identity is not registered.
    #[error("User {0} is not online.")]
    RecipientOffline(Identity),

    /// A payment step arrived out of sequence or from the wrong party.
    #[error("Cannot {step}: {reason}")]
    InvalidTransition { step: &'static str, reason: String },

    /// The payment deadline passed before the step arrived.
    #[error("Payment session with {0} has expired")]
    SessionExpired(Identity),

    /// The target's outbound queue is saturated; the event was dropped.
    #[error("Could not deliver to {0}: outbound queue is full")]
    DeliveryFailed(Identity),
}

impl RouteError {
    /// Short kind label used for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::RecipientOffline(_) => "recipient_offline",
            RouteError::InvalidTransition { .. } => "invalid_transition",
            RouteError::SessionExpired(_) => "session_expired",
            RouteError::DeliveryFailed(_) => "delivery_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_message_text() {
        let err = RouteError::RecipientOffline("u2".into());
        assert_eq!(err.to_string(), "User u2 is not online.");
        assert_eq!(err.kind(), "recipient_offline");
    }
}
