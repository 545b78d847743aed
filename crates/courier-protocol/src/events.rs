//! Event types for the realtime channel.
//!
//! Every frame is an adjacently tagged envelope: the `event` field names the
//! event and `data` carries its payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A client-chosen logical user token used for routing.
pub type Identity = String;

/// Body of the receipt notification.
pub const RECEIPT_MESSAGE: &str = "Payment done";

/// Body of the confirmation sent to the paying party.
pub const CONFIRMED_MESSAGE: &str = "Payment done and your order is successfully placed";

/// Body of the conflict notification sent to both parties.
pub const CONFLICT_MESSAGE: &str = "Conflict in payment status";

/// A yes/no answer used by the availability and confirmation steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
}

impl Answer {
    /// Whether this is an affirmative answer.
    #[must_use]
    pub fn is_yes(self) -> bool {
        matches!(self, Answer::Yes)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Yes => f.write_str("yes"),
            Answer::No => f.write_str("no"),
        }
    }
}

/// Payload of a `register` event.
///
/// Older clients send the identity as a bare string, newer ones as
/// `{"userId": ...}`. Both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Registration {
    Bare(Identity),
    Object {
        #[serde(rename = "userId")]
        user_id: Identity,
    },
}

impl Registration {
    /// The identity being registered.
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Registration::Bare(id) => id,
            Registration::Object { user_id } => user_id,
        }
    }

    /// Consume the payload, returning the identity.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        match self {
            Registration::Bare(id) => id,
            Registration::Object { user_id } => user_id,
        }
    }
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind an identity to the sending connection.
    Register(Registration),

    /// Send a private text message.
    SendPrivateMessage {
        to: Identity,
        message: String,
        from: Identity,
    },

    /// Payment step 1: ask the counterparty whether they are available.
    AskAvailability { from: Identity, to: Identity },

    /// Payment step 2: answer an availability request.
    AvailabilityResponse {
        from: Identity,
        to: Identity,
        response: Answer,
    },

    /// Payment step 3: ask for bank details.
    AskPaymentDetails { from: Identity, to: Identity },

    /// Payment step 4: send bank details, arming the payment timer.
    SendBankDetails {
        from: Identity,
        to: Identity,
        #[serde(rename = "bankDetails")]
        bank_details: serde_json::Value,
    },

    /// Payment step 5: report that the payment was made.
    SendReceipt { from: Identity, to: Identity },

    /// Payment step 6: confirm or dispute the payment.
    ConfirmPaymentStatus {
        from: Identity,
        to: Identity,
        status: Answer,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::SendPrivateMessage { .. } => "sendPrivateMessage",
            ClientEvent::AskAvailability { .. } => "askAvailability",
            ClientEvent::AvailabilityResponse { .. } => "availabilityResponse",
            ClientEvent::AskPaymentDetails { .. } => "askPaymentDetails",
            ClientEvent::SendBankDetails { .. } => "sendBankDetails",
            ClientEvent::SendReceipt { .. } => "sendReceipt",
            ClientEvent::ConfirmPaymentStatus { .. } => "confirmPaymentStatus",
        }
    }

    /// The `(from, to)` pair of a routed event, `None` for `register`.
    #[must_use]
    pub fn parties(&self) -> Option<(&str, &str)> {
        match self {
            ClientEvent::Register(_) => None,
            ClientEvent::SendPrivateMessage { from, to, .. }
            | ClientEvent::AskAvailability { from, to }
            | ClientEvent::AvailabilityResponse { from, to, .. }
            | ClientEvent::AskPaymentDetails { from, to }
            | ClientEvent::SendBankDetails { from, to, .. }
            | ClientEvent::SendReceipt { from, to }
            | ClientEvent::ConfirmPaymentStatus { from, to, .. } => Some((from, to)),
        }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Current set of registered identities.
    UserListUpdate(Vec<Identity>),

    ReceivePrivateMessage { from: Identity, message: String },

    /// Human-readable failure reported to the sender.
    ErrorMessage(String),

    ReceiveAvailabilityRequest { from: Identity },

    ReceiveAvailabilityResponse { from: Identity, response: Answer },

    ReceiveAskForBankDetails { from: Identity },

    ReceiveBankDetails {
        from: Identity,
        #[serde(rename = "bankDetails")]
        bank_details: serde_json::Value,
    },

    /// Client-side countdown, in seconds.
    StartPaymentTimer { from: Identity, duration: u64 },

    /// Hint to reveal the receipt button after `delay` seconds.
    ShowSendReceiptButton { delay: u64 },

    ReceivePaymentReceipt { from: Identity, message: String },

    PaymentConfirmed { from: Identity, message: String },

    PaymentConflict { from: Identity, message: String },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserListUpdate(_) => "userListUpdate",
            ServerEvent::ReceivePrivateMessage { .. } => "receivePrivateMessage",
            ServerEvent::ErrorMessage(_) => "errorMessage",
            ServerEvent::ReceiveAvailabilityRequest { .. } => "receiveAvailabilityRequest",
            ServerEvent::ReceiveAvailabilityResponse { .. } => "receiveAvailabilityResponse",
            ServerEvent::ReceiveAskForBankDetails { .. } => "receiveAskForBankDetails",
            ServerEvent::ReceiveBankDetails { .. } => "receiveBankDetails",
            ServerEvent::StartPaymentTimer { .. } => "startPaymentTimer",
            ServerEvent::ShowSendReceiptButton { .. } => "showSendReceiptButton",
            ServerEvent::ReceivePaymentReceipt { .. } => "receivePaymentReceipt",
            ServerEvent::PaymentConfirmed { .. } => "paymentConfirmed",
            ServerEvent::PaymentConflict { .. } => "paymentConflict",
        }
    }

    /// Create an `errorMessage` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::ErrorMessage(message.into())
    }

    /// Create a `receivePaymentReceipt` event.
    #[must_use]
    pub fn payment_receipt(from: impl Into<Identity>) -> Self {
        ServerEvent::ReceivePaymentReceipt {
            from: from.into(),
            message: RECEIPT_MESSAGE.to_string(),
        }
    }

    /// Create a `paymentConfirmed` event.
    #[must_use]
    pub fn payment_confirmed(from: impl Into<Identity>) -> Self {
        ServerEvent::PaymentConfirmed {
            from: from.into(),
            message: CONFIRMED_MESSAGE.to_string(),
        }
    }

    /// Create a `paymentConflict` event.
    #[must_use]
    pub fn payment_conflict(from: impl Into<Identity>) -> Self {
        ServerEvent::PaymentConflict {
            from: from.into(),
            message: CONFLICT_MESSAGE.to_string(),
        }
    }
}
