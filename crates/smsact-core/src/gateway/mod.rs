//! Remote marketplace gateway.
//!
//! The gateway is the only component that talks to the marketplace API.
//! The core consumes it through the [`ActivationGateway`] trait so the
//! poll worker, purchase workflow and CLI are all testable against
//! [`MockActivationGateway`] without a network.
//!
//! ```text
//! ActivationGateway (trait)
//!     |
//!     +-- HttpActivationGateway   blocking reqwest client, X-Api-Key auth
//!     |
//!     +-- MockActivationGateway   scripted responses for tests
//! ```
//!
//! Two failure signals are load-bearing for callers and therefore have
//! dedicated variants: [`GatewayError::RateLimited`] (a poll pass must
//! abort its remaining batch, not busy-retry) and
//! [`GatewayError::NotFound`] (a ghost activation: present locally,
//! missing remotely).

mod http;
mod mock;

pub use http::HttpActivationGateway;
pub use mock::MockActivationGateway;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activation::{Activation, LifecycleState, SmsStatus};
use crate::reconcile::ChannelEvent;

/// Price band the marketplace quotes for a service/country pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    /// Lowest asking price.
    pub min: f64,
    /// Highest asking price.
    pub max: f64,
    /// Marketplace-suggested price.
    pub suggested: f64,
}

/// Average quality score the marketplace reports for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Mean score in `[0, 1]`.
    pub avg: f64,
}

/// Availability of a service in one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    /// Country the numbers would come from.
    pub country_id: String,
    /// Quoted price band.
    pub price: PriceBand,
    /// Numbers currently available.
    pub count: u32,
    /// Quality score, when the marketplace reports one.
    #[serde(default)]
    pub quality: Option<QualityScore>,
}

/// Account balance snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Total funds on the account.
    pub total: f64,
    /// Funds reserved by in-flight activations.
    pub reserved: f64,
}

/// Parameters for a new activation request. The `order_id` is the
/// caller-assigned correlation id and doubles as the idempotency key on
/// the remote side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewActivationRequest {
    /// Service to lease a number for.
    pub service_id: String,
    /// Country to lease from.
    pub country_id: String,
    /// Budget ceiling agreed for this activation.
    pub max_price: f64,
    /// Caller-assigned correlation id.
    pub order_id: String,
}

/// An activation snapshot as the marketplace reports it.
///
/// Status fields stay raw strings on purpose: poll snapshots feed the
/// reconciliation engine through the same normalizer as webhook payloads,
/// so vocabulary mapping happens in exactly one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteActivation {
    /// Remote-assigned activation id.
    pub activation_id: String,
    /// Caller correlation id echoed back, when one was sent.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Leased phone number.
    #[serde(default)]
    pub phone: String,
    /// Service the number is leased for.
    pub service_id: String,
    /// Country the number belongs to.
    pub country_id: String,
    /// Raw lifecycle status string.
    pub activation_status: String,
    /// Raw SMS status string.
    #[serde(default)]
    pub sms_status: Option<String>,
    /// SMS code, once delivered.
    #[serde(default)]
    pub sms_code: Option<String>,
    /// SMS text, once delivered.
    #[serde(default)]
    pub sms_text: Option<String>,
    /// Price reserved/consumed.
    pub price: f64,
    /// Ceiling sent with the request, echoed back.
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Creation time, unix seconds.
    pub created_at: u64,
    /// Last remote update, unix seconds.
    pub updated_at: u64,
    /// Absolute deadline, unix seconds.
    pub expire_at: u64,
    /// Whether another SMS can be requested.
    #[serde(default)]
    pub is_retriable: Option<bool>,
}

impl RemoteActivation {
    /// Builds the local aggregate from a creation response.
    ///
    /// Only used when a record is first created; afterwards the local
    /// record is mutated exclusively through reconciliation instructions.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Decode`] when the reported status is outside the
    /// lifecycle vocabulary.
    pub fn to_activation(&self) -> Result<Activation, GatewayError> {
        let state =
            LifecycleState::from_wire(&self.activation_status).ok_or_else(|| {
                GatewayError::Decode {
                    message: format!(
                        "unknown activation_status {:?} for {}",
                        self.activation_status, self.activation_id
                    ),
                }
            })?;
        let sms_status = self
            .sms_status
            .as_deref()
            .and_then(SmsStatus::from_wire)
            .unwrap_or(SmsStatus::None);

        Ok(Activation {
            id: self.activation_id.clone(),
            external_id: self.order_id.clone(),
            phone: self.phone.clone(),
            service_id: self.service_id.clone(),
            country_id: self.country_id.clone(),
            state,
            sms_status,
            price: self.price,
            max_price: self.max_price.unwrap_or(0.0),
            sms_code: self.sms_code.clone(),
            sms_text: self.sms_text.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expire_at,
            is_retriable: self.is_retriable.unwrap_or(false),
        })
    }

    /// Reduces this snapshot to the event shape the reconciliation engine
    /// consumes, exactly as if it had arrived over the webhook channel.
    #[must_use]
    pub fn to_channel_event(&self) -> ChannelEvent {
        ChannelEvent {
            activation_id: self.activation_id.clone(),
            status: self.activation_status.clone(),
            sms_status: self.sms_status.clone(),
            sms_code: self.sms_code.clone(),
            sms_text: self.sms_text.clone(),
        }
    }
}

/// Errors surfaced by gateway implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The marketplace rate limiter tripped. Callers iterating a batch
    /// must abort the remainder instead of retrying immediately.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds to wait, when the marketplace said so.
        retry_after: Option<u64>,
    },

    /// The resource does not exist remotely.
    #[error("not found: {id}")]
    NotFound {
        /// Id of the missing resource.
        id: String,
    },

    /// The market price moved above the requested ceiling.
    #[error("market price exceeded max_price (suggested {suggested_price})")]
    PriceConflict {
        /// Price the marketplace suggests instead.
        suggested_price: f64,
    },

    /// Any other remote rejection.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Remote error message, when one was provided.
        message: String,
    },

    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },

    /// The response body could not be interpreted.
    #[error("decode error: {message}")]
    Decode {
        /// What failed to parse.
        message: String,
    },
}

impl GatewayError {
    /// Returns `true` for the rate-limit signal.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` for the not-found signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Remote marketplace operations the core consumes.
///
/// Implementations are synchronous; async callers move invocations off
/// their executor themselves.
pub trait ActivationGateway: Send + Sync {
    /// Lists availability (offers) for a service across countries.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`]; an empty list is not an error here — the
    /// purchasing workflow decides what emptiness means.
    fn get_prices(&self, service_id: &str) -> Result<Vec<Availability>, GatewayError>;

    /// Fetches the current remote snapshot of one activation.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotFound`] when the activation is unknown remotely,
    /// or any other [`GatewayError`].
    fn get_activation(&self, id: &str) -> Result<RemoteActivation, GatewayError>;

    /// Purchases an activation.
    ///
    /// # Errors
    ///
    /// [`GatewayError::PriceConflict`] when the market moved above the
    /// ceiling, or any other [`GatewayError`].
    fn request_activation(
        &self,
        request: &NewActivationRequest,
    ) -> Result<RemoteActivation, GatewayError>;

    /// Cancels an activation remotely.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn cancel_activation(&self, id: &str) -> Result<(), GatewayError>;

    /// Finalizes (settles) an activation remotely.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn finalize_activation(&self, id: &str) -> Result<(), GatewayError>;

    /// Fetches the account balance.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`].
    fn get_balance(&self) -> Result<Balance, GatewayError>;

    /// Implementation name, for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteActivation {
        RemoteActivation {
            activation_id: "act-1".to_string(),
            order_id: Some("ord-1".to_string()),
            phone: "+15550001111".to_string(),
            service_id: "svc-wa".to_string(),
            country_id: "us".to_string(),
            activation_status: "active".to_string(),
            sms_status: Some("smsRequested".to_string()),
            sms_code: None,
            sms_text: None,
            price: 0.35,
            max_price: Some(0.50),
            created_at: 1_000,
            updated_at: 1_100,
            expire_at: 2_000,
            is_retriable: Some(true),
        }
    }

    #[test]
    fn snapshot_converts_to_activation() {
        let activation = remote().to_activation().unwrap();
        assert_eq!(activation.id, "act-1");
        assert_eq!(activation.external_id.as_deref(), Some("ord-1"));
        assert_eq!(activation.state, LifecycleState::Active);
        assert_eq!(activation.sms_status, SmsStatus::SmsRequested);
        assert_eq!(activation.expires_at, 2_000);
        assert!(activation.is_retriable);
    }

    #[test]
    fn unknown_status_fails_to_convert() {
        let mut snapshot = remote();
        snapshot.activation_status = "weird".to_string();
        assert!(matches!(
            snapshot.to_activation(),
            Err(GatewayError::Decode { .. })
        ));
    }

    #[test]
    fn snapshot_reduces_to_channel_event_with_raw_strings() {
        let mut snapshot = remote();
        snapshot.sms_code = Some("123456".to_string());
        let event = snapshot.to_channel_event();
        assert_eq!(event.activation_id, "act-1");
        assert_eq!(event.status, "active");
        assert_eq!(event.sms_status.as_deref(), Some("smsRequested"));
        assert_eq!(event.sms_code.as_deref(), Some("123456"));
    }

    #[test]
    fn wire_shape_parses_with_optional_fields_absent() {
        let json = r#"{
            "activation_id": "act-9",
            "service_id": "svc-wa",
            "country_id": "us",
            "activation_status": "pending",
            "price": 0.4,
            "created_at": 1000,
            "updated_at": 1000,
            "expire_at": 1900
        }"#;
        let snapshot: RemoteActivation = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.order_id, None);
        assert_eq!(snapshot.max_price, None);
        let activation = snapshot.to_activation().unwrap();
        assert_eq!(activation.state, LifecycleState::Pending);
        assert_eq!(activation.sms_status, SmsStatus::None);
    }

    #[test]
    fn error_signals_are_distinguishable() {
        assert!(GatewayError::RateLimited { retry_after: None }.is_rate_limited());
        assert!(
            GatewayError::NotFound {
                id: "act-1".to_string()
            }
            .is_not_found()
        );
        assert!(
            !GatewayError::Api {
                status: 500,
                message: "boom".to_string()
            }
            .is_rate_limited()
        );
    }
}
