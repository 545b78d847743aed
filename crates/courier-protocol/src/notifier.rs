//! Frames for the payment notification socket.
//!
//! This surface is intentionally small: clients register an identity and the
//! server pushes payment results to it.

use serde::{Deserialize, Serialize};

use crate::events::Identity;

/// A notifier frame, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierFrame {
    /// Client registration.
    Register {
        #[serde(rename = "userId")]
        user_id: Identity,
    },

    /// Registration acknowledgment.
    Registered { message: String },

    /// A payment to the registered user went through.
    PaymentSuccess {
        payer: Identity,
        amount: u64,
        message: String,
    },
}

impl NotifierFrame {
    /// Create a `registered` acknowledgment for an identity.
    #[must_use]
    pub fn registered(user_id: &str) -> Self {
        NotifierFrame::Registered {
            message: format!("User {} registered successfully", user_id),
        }
    }

    /// Create a `payment_success` notification.
    #[must_use]
    pub fn payment_success(payer: impl Into<Identity>, amount: u64) -> Self {
        let payer = payer.into();
        let message = format!("Payment of ₹{} done by {}", amount, payer);
        NotifierFrame::PaymentSuccess {
            payer,
            amount,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_frame() {
        let frame: NotifierFrame =
            serde_json::from_value(json!({"type": "register", "userId": "user123"})).unwrap();
        assert_eq!(
            frame,
            NotifierFrame::Register {
                user_id: "user123".into()
            }
        );
    }

    #[test]
    fn test_payment_success_frame() {
        let value = serde_json::to_value(NotifierFrame::payment_success("user456", 150)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "payment_success",
                "payer": "user456",
                "amount": 150,
                "message": "Payment of ₹150 done by user456"
            })
        );
    }
}
