//! Inbound webhook payloads and response mapping.
//!
//! The marketplace pushes events as JSON envelopes. Parsing happens in two
//! phases: the envelope first (any event type is acceptable and gets
//! acknowledged), then — only for `activation.updated` — the activation
//! payload, which is the one event kind that may mutate state.
//!
//! Response contract: every *parsed* payload is acknowledged with 200,
//! including duplicates, out-of-order deliveries, unknown statuses and
//! invariant violations — the provider must not be invited to retry for
//! non-transient reasons. The single retry-soliciting case is an unknown
//! activation id (the record may simply not be persisted yet).

pub mod error;
pub mod rate_limit;

pub use error::WebhookError;
pub use rate_limit::{IngressRateLimiter, RateLimitConfig};

use serde::{Deserialize, Serialize};

use crate::reconcile::ChannelEvent;

/// The one event type that enters the reconciliation path.
pub const EVENT_ACTIVATION_UPDATED: &str = "activation.updated";

/// Outer webhook envelope. The payload stays untyped until the event type
/// is known; non-activation events (balance notices and the like) carry
/// arbitrary shapes and are acknowledged without inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Provider event kind, e.g. `activation.updated`.
    pub event_type: String,
    /// Provider-assigned delivery id.
    pub event_id: String,
    /// Event body; shape depends on `event_type`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEnvelope {
    /// Returns `true` when this envelope may mutate activation state.
    #[must_use]
    pub fn is_activation_update(&self) -> bool {
        self.event_type == EVENT_ACTIVATION_UPDATED
    }

    /// Parses the activation payload out of an `activation.updated`
    /// envelope.
    ///
    /// # Errors
    ///
    /// [`WebhookError::MalformedPayload`] when the body does not carry
    /// the required fields.
    pub fn activation_payload(&self) -> Result<ActivationEventPayload, WebhookError> {
        serde_json::from_value(self.payload.clone()).map_err(|error| {
            WebhookError::MalformedPayload {
                message: format!("event {}: {error}", self.event_id),
            }
        })
    }
}

/// Body of an `activation.updated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationEventPayload {
    /// Remote activation id the event is about.
    pub activation_id: String,
    /// Raw lifecycle status string.
    pub activation_status: String,
    /// Raw SMS status string.
    #[serde(default)]
    pub sms_status: Option<String>,
    /// SMS code, when the event carries one.
    #[serde(default)]
    pub sms_code: Option<String>,
    /// SMS text, when the event carries one.
    #[serde(default)]
    pub sms_text: Option<String>,
}

impl ActivationEventPayload {
    /// Reduces the payload to the channel-independent event shape.
    #[must_use]
    pub fn into_channel_event(self) -> ChannelEvent {
        ChannelEvent {
            activation_id: self.activation_id,
            status: self.activation_status,
            sms_status: self.sms_status,
            sms_code: self.sms_code,
            sms_text: self.sms_text,
        }
    }
}
