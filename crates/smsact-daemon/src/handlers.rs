//! Webhook endpoint handlers.
//!
//! The HTTP layer stays thin: parse, rate-limit, then hand the event to
//! [`process_activation_event`], which owns the read-reconcile-write
//! cycle and is plain synchronous code (testable without a server).
//!
//! Response discipline: 200 acknowledges everything that was parsed —
//! applied changes, halts, foreign event types, and even invariant
//! violations (those are operator problems, not provider problems; a
//! redelivery would just violate the same invariant again). Only an
//! unknown activation id answers 404 to solicit a retry, because the
//! record may still be on its way into storage.

use std::net::SocketAddr;
use std::sync::PoisonError;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use serde::Serialize;

use smsact_core::activation::LifecycleState;
use smsact_core::reconcile::{ChannelEvent, Disposition, HaltReason, ReconcileError, reconcile};
use smsact_core::webhook::{WebhookEnvelope, WebhookError};

use crate::state::{DaemonState, SharedState};
use crate::unix_now;

/// Acknowledgment body returned for every accepted delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    /// What happened: `applied`, `halted`, `ignored`, or
    /// `invariant_violation`.
    pub result: &'static str,
    /// New lifecycle state, present when the delivery applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Human-readable halt/violation detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WebhookAck {
    fn applied(state: LifecycleState) -> Self {
        Self {
            result: "applied",
            state: Some(state.to_string()),
            detail: None,
        }
    }

    fn halted(reason: &HaltReason) -> Self {
        Self {
            result: "halted",
            state: None,
            detail: Some(reason.to_string()),
        }
    }

    fn ignored() -> Self {
        Self {
            result: "ignored",
            state: None,
            detail: None,
        }
    }

    fn rejected(error: &ReconcileError) -> Self {
        Self {
            result: "invariant_violation",
            state: None,
            detail: Some(error.to_string()),
        }
    }
}

/// `POST /webhook`.
pub async fn webhook(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Json<WebhookAck>, WebhookError> {
    state.limiter.check(addr.ip())?;

    let envelope: WebhookEnvelope =
        serde_json::from_slice(&body).map_err(|error| WebhookError::MalformedPayload {
            message: error.to_string(),
        })?;

    if !envelope.is_activation_update() {
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            "non-activation event acknowledged"
        );
        return Ok(Json(WebhookAck::ignored()));
    }

    let event = envelope.activation_payload()?.into_channel_event();
    let ack = process_activation_event(&state, &event)?;
    Ok(Json(ack))
}

/// `GET /healthz`.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Runs one webhook-channel event through the reconciliation authority.
///
/// Holds the activation's lock across the whole read-reconcile-write
/// sequence so a concurrent poll pass cannot interleave on the same id.
///
/// # Errors
///
/// [`WebhookError::UnknownActivation`] for ids not in storage (the one
/// retry-soliciting answer) and [`WebhookError::Internal`] for storage
/// failures. Reconciliation halts and invariant violations are *not*
/// errors here; they acknowledge with 200.
pub fn process_activation_event(
    state: &DaemonState,
    event: &ChannelEvent,
) -> Result<WebhookAck, WebhookError> {
    let lock = state.locks.lock_for(&event.activation_id);
    let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

    let current = state
        .repository
        .find_by_id(&event.activation_id)
        .map_err(|error| WebhookError::Internal {
            message: error.to_string(),
        })?;
    let Some(current) = current else {
        tracing::warn!(
            activation_id = %event.activation_id,
            "webhook for unknown activation"
        );
        return Err(WebhookError::UnknownActivation {
            activation_id: event.activation_id.clone(),
        });
    };

    let now = unix_now();
    match reconcile(&current, event, now) {
        Ok(Disposition::Apply(update)) => {
            let updated = update.apply_to(&current, now);
            state
                .repository
                .save(&updated)
                .map_err(|error| WebhookError::Internal {
                    message: error.to_string(),
                })?;
            tracing::info!(
                activation_id = %updated.id,
                from = %current.state,
                to = %updated.state,
                "webhook applied"
            );
            Ok(WebhookAck::applied(updated.state))
        }
        Ok(Disposition::Halt(reason)) => {
            tracing::debug!(
                activation_id = %event.activation_id,
                %reason,
                "webhook absorbed"
            );
            Ok(WebhookAck::halted(&reason))
        }
        Err(error) => {
            // Terminal logical failure: loud for the operator, 200 for the
            // provider — redelivering would violate the same invariant.
            tracing::error!(
                activation_id = %event.activation_id,
                %error,
                "webhook invariant violation"
            );
            Ok(WebhookAck::rejected(&error))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smsact_core::activation::{Activation, SmsStatus};
    use smsact_core::gateway::MockActivationGateway;
    use smsact_core::repository::{ActivationRepository, InMemoryActivationRepository};
    use smsact_core::webhook::RateLimitConfig;

    use super::*;

    fn state_with(records: &[Activation]) -> (DaemonState, Arc<InMemoryActivationRepository>) {
        let repository = Arc::new(InMemoryActivationRepository::new());
        for record in records {
            repository.save(record).unwrap();
        }
        let state = DaemonState::new(
            Arc::clone(&repository) as Arc<dyn ActivationRepository>,
            Arc::new(MockActivationGateway::new()),
            RateLimitConfig::default(),
        );
        (state, repository)
    }

    fn activation(id: &str, state: LifecycleState) -> Activation {
        Activation {
            id: id.to_string(),
            external_id: None,
            phone: "+15550001111".to_string(),
            service_id: "svc-wa".to_string(),
            country_id: "us".to_string(),
            state,
            sms_status: SmsStatus::None,
            price: 0.35,
            max_price: 0.50,
            sms_code: None,
            sms_text: None,
            created_at: 1_000,
            updated_at: 1_000,
            // Far future: handler tests run against the real clock.
            expires_at: u64::MAX,
            is_retriable: false,
        }
    }

    fn event(id: &str, status: &str) -> ChannelEvent {
        ChannelEvent {
            activation_id: id.to_string(),
            status: status.to_string(),
            sms_status: None,
            sms_code: None,
            sms_text: None,
        }
    }

    #[test]
    fn applied_event_persists_and_acknowledges() {
        let (state, repository) = state_with(&[activation("act-1", LifecycleState::Pending)]);

        let ack = process_activation_event(&state, &event("act-1", "active")).unwrap();
        assert_eq!(ack.result, "applied");
        assert_eq!(ack.state.as_deref(), Some("active"));
        assert_eq!(
            repository.find_by_id("act-1").unwrap().unwrap().state,
            LifecycleState::Active
        );
    }

    #[test]
    fn duplicate_event_halts_with_200_semantics() {
        let (state, repository) = state_with(&[activation("act-1", LifecycleState::Active)]);

        let ack = process_activation_event(&state, &event("act-1", "active")).unwrap();
        assert_eq!(ack.result, "halted");
        assert_eq!(
            repository.find_by_id("act-1").unwrap().unwrap().state,
            LifecycleState::Active
        );
    }

    #[test]
    fn unknown_activation_is_the_retryable_case() {
        let (state, _repository) = state_with(&[]);

        let result = process_activation_event(&state, &event("act-ghost", "active"));
        let Err(error) = result else {
            panic!("expected unknown-activation error");
        };
        assert!(matches!(error, WebhookError::UnknownActivation { .. }));
        assert_eq!(error.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn invariant_violation_acknowledges_but_reports() {
        let (state, repository) = state_with(&[activation("act-1", LifecycleState::Canceled)]);

        let ack = process_activation_event(&state, &event("act-1", "finalized")).unwrap();
        assert_eq!(ack.result, "invariant_violation");
        // The record stayed frozen.
        assert_eq!(
            repository.find_by_id("act-1").unwrap().unwrap().state,
            LifecycleState::Canceled
        );
    }

    #[test]
    fn unknown_status_is_absorbed() {
        let (state, _repository) = state_with(&[activation("act-1", LifecycleState::Active)]);

        let ack =
            process_activation_event(&state, &event("act-1", "account.low_balance")).unwrap();
        assert_eq!(ack.result, "halted");
        assert!(ack.detail.unwrap().contains("unknown status"));
    }
}
