//! The reconciliation engine.
//!
//! [`reconcile`] is the one function through which every lifecycle
//! observation flows, whichever channel delivered it. It never mutates
//! anything itself: on success it returns a [`StateUpdate`] instruction
//! that the repository-aware caller applies and persists.

use std::fmt;

use thiserror::Error;

use crate::activation::{Activation, LifecycleState, SmsStatus, TransitionError, transition};
use crate::reconcile::normalize::normalize;

/// A lifecycle observation from either channel, reduced to the fields the
/// engine needs. Webhook payloads, poll snapshots and manual operations
/// all convert into this shape before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Remote activation id the observation is about.
    pub activation_id: String,
    /// Raw provider status string.
    pub status: String,
    /// Raw provider SMS status string, when present.
    pub sms_status: Option<String>,
    /// SMS verification code, when the event carried one.
    pub sms_code: Option<String>,
    /// Full SMS text, when the event carried one.
    pub sms_text: Option<String>,
}

/// A pure mutation instruction produced by [`reconcile`].
///
/// The engine never writes; the caller applies the instruction via
/// [`StateUpdate::apply_to`] and stamps `updated_at` in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Lifecycle state to store.
    pub new_state: LifecycleState,
    /// SMS status to store.
    pub new_sms_status: SmsStatus,
    /// SMS code to store. Sticky: the incoming value wins only when the
    /// event supplied one, otherwise the prior value survives. Never
    /// cleared.
    pub sms_code: Option<String>,
    /// SMS text to store. Same stickiness as `sms_code`.
    pub sms_text: Option<String>,
    /// `true` when this instruction completes the activation; callers use
    /// it to trigger remote finalization bookkeeping.
    pub should_finalize: bool,
}

impl StateUpdate {
    /// Applies this instruction to `current`, producing the new record
    /// value with `updated_at` stamped to `now`.
    #[must_use]
    pub fn apply_to(&self, current: &Activation, now: u64) -> Activation {
        Activation {
            state: self.new_state,
            sms_status: self.new_sms_status,
            sms_code: self.sms_code.clone(),
            sms_text: self.sms_text.clone(),
            updated_at: now,
            ..current.clone()
        }
    }
}

/// Why an observation was absorbed without producing an instruction.
///
/// Halts are ordinary consequences of at-least-once, unordered delivery.
/// They must not be escalated, retried, or logged as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The event's status is outside the lifecycle vocabulary (balance
    /// notices, internal event kinds, unknown strings).
    UnknownStatus {
        /// The raw status that failed to map.
        status: String,
    },
    /// A stale observation arrived after the record had already moved
    /// past it. Forward progress is preserved by ignoring it.
    OutOfOrder {
        /// State the record is in.
        from: LifecycleState,
        /// State the stale event asked for.
        to: LifecycleState,
    },
    /// The observation restates exactly what the record already says.
    Idempotent,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStatus { status } => write!(f, "unknown status: {status}"),
            Self::OutOfOrder { from, to } => {
                write!(f, "out-of-order event ignored: {from} -> {to}")
            }
            Self::Idempotent => write!(f, "idempotent event: no change required"),
        }
    }
}

/// The engine's answer for a well-formed observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Persist this instruction.
    Apply(StateUpdate),
    /// Absorb the event; nothing to persist.
    Halt(HaltReason),
}

/// Genuine integrity failures, surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The event targets a different activation than the record it was
    /// matched against. Never silently coerced.
    #[error("activation id mismatch: event targets {got}, record is {expected}")]
    IdMismatch {
        /// Id of the record the caller loaded.
        expected: String,
        /// Id named by the event.
        got: String,
    },

    /// The transition violated a lifecycle invariant (terminal mutation,
    /// mutual exclusion, TTL breach). Plain out-of-order transitions are
    /// downgraded to [`HaltReason::OutOfOrder`] instead and never appear
    /// here.
    #[error(transparent)]
    Invariant(#[from] TransitionError),
}

/// Reconciles one channel observation against the current record.
///
/// Decision sequence:
///
/// 1. Identity: the event must name the record's id.
/// 2. Normalization: unrecognized statuses halt (expected traffic).
/// 3. Transition: the state machine validates the move with `now` as the
///    explicit clock. An illegal (out-of-order) transition halts; every
///    other violation is a hard error.
/// 4. Idempotency: if the computed state, SMS status and effective SMS
///    code all match the record, nothing is emitted. Empty and absent
///    codes compare equal. A terminal record short-circuits here —
///    frozen means frozen, even if a duplicate carries new payload.
///
/// The returned instruction carries sticky SMS fields: an incoming value
/// wins only when present, the prior value survives otherwise.
///
/// # Errors
///
/// [`ReconcileError::IdMismatch`] or [`ReconcileError::Invariant`]; both
/// indicate upstream bugs or data-integrity problems, not delivery noise.
pub fn reconcile(
    current: &Activation,
    event: &ChannelEvent,
    now: u64,
) -> Result<Disposition, ReconcileError> {
    if event.activation_id != current.id {
        return Err(ReconcileError::IdMismatch {
            expected: current.id.clone(),
            got: event.activation_id.clone(),
        });
    }

    let Some(normalized) = normalize(
        &event.status,
        event.sms_status.as_deref(),
        event.sms_code.as_deref(),
    ) else {
        return Ok(Disposition::Halt(HaltReason::UnknownStatus {
            status: event.status.clone(),
        }));
    };

    let event_code = non_empty(event.sms_code.as_deref());
    let next_sms_status = normalized.sms_status.unwrap_or(if event_code.is_some() {
        SmsStatus::SmsReceived
    } else {
        current.sms_status
    });

    let next = match transition(current, normalized.state, next_sms_status, now) {
        Ok(next) => next,
        Err(TransitionError::IllegalTransition { from, to }) => {
            return Ok(Disposition::Halt(HaltReason::OutOfOrder { from, to }));
        }
        Err(violation) => return Err(ReconcileError::Invariant(violation)),
    };

    let current_code = non_empty(current.sms_code.as_deref());
    let effective_code = event_code.or(current_code);

    if next.state == current.state {
        if current.is_terminal() {
            return Ok(Disposition::Halt(HaltReason::Idempotent));
        }
        if next.sms_status == current.sms_status && effective_code == current_code {
            return Ok(Disposition::Halt(HaltReason::Idempotent));
        }
    }

    let effective_text = non_empty(event.sms_text.as_deref())
        .or_else(|| non_empty(current.sms_text.as_deref()));

    Ok(Disposition::Apply(StateUpdate {
        new_state: next.state,
        new_sms_status: next.sms_status,
        sms_code: effective_code.map(str::to_string),
        sms_text: effective_text.map(str::to_string),
        should_finalize: next.state == LifecycleState::Finalized,
    }))
}

/// Treats empty and whitespace-only strings as absent, so `None`, `""`
/// and `"  "` all compare equal in idempotency checks.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_500;

    fn activation(state: LifecycleState) -> Activation {
        Activation {
            id: "act-1".to_string(),
            external_id: Some("ord-1".to_string()),
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
            expires_at: 2_000,
            is_retriable: false,
        }
    }

    fn event(status: &str) -> ChannelEvent {
        ChannelEvent {
            activation_id: "act-1".to_string(),
            status: status.to_string(),
            sms_status: None,
            sms_code: None,
            sms_text: None,
        }
    }

    fn apply(disposition: Disposition) -> StateUpdate {
        match disposition {
            Disposition::Apply(update) => update,
            Disposition::Halt(reason) => panic!("expected apply, got halt: {reason}"),
        }
    }

    #[test]
    fn id_mismatch_is_a_hard_failure() {
        let current = activation(LifecycleState::Active);
        let mut ev = event("active");
        ev.activation_id = "act-2".to_string();
        let result = reconcile(&current, &ev, NOW);
        assert!(matches!(result, Err(ReconcileError::IdMismatch { .. })));
    }

    #[test]
    fn unknown_status_halts_instead_of_failing() {
        let current = activation(LifecycleState::Active);
        let result = reconcile(&current, &event("account.low_balance"), NOW).unwrap();
        assert!(matches!(
            result,
            Disposition::Halt(HaltReason::UnknownStatus { .. })
        ));
    }

    #[test]
    fn forward_transition_produces_an_instruction() {
        let current = activation(LifecycleState::Pending);
        let update = apply(reconcile(&current, &event("active"), NOW).unwrap());
        assert_eq!(update.new_state, LifecycleState::Active);
        assert!(!update.should_finalize);
    }

    #[test]
    fn out_of_order_delivery_is_absorbed() {
        let current = activation(LifecycleState::SmsReceived);
        let result = reconcile(&current, &event("active"), NOW).unwrap();
        assert_eq!(
            result,
            Disposition::Halt(HaltReason::OutOfOrder {
                from: LifecycleState::SmsReceived,
                to: LifecycleState::Active,
            })
        );
    }

    #[test]
    fn late_intermediate_state_after_forward_jump_is_absorbed() {
        // sms_received delivered while still Pending: forward jump wins.
        let current = activation(LifecycleState::Pending);
        let mut ev = event("sms_received");
        ev.sms_code = Some("123456".to_string());
        let update = apply(reconcile(&current, &ev, NOW).unwrap());
        assert_eq!(update.new_state, LifecycleState::SmsReceived);
        let jumped = update.apply_to(&current, NOW);

        // The straggling "active" that should have come first is now
        // regressive and halts without mutating anything.
        let result = reconcile(&jumped, &event("active"), NOW).unwrap();
        assert_eq!(
            result,
            Disposition::Halt(HaltReason::OutOfOrder {
                from: LifecycleState::SmsReceived,
                to: LifecycleState::Active,
            })
        );
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let current = activation(LifecycleState::Active);
        let result = reconcile(&current, &event("active"), NOW).unwrap();
        assert_eq!(result, Disposition::Halt(HaltReason::Idempotent));
    }

    #[test]
    fn empty_and_absent_codes_compare_equal() {
        let mut current = activation(LifecycleState::SmsReceived);
        current.sms_status = SmsStatus::SmsReceived;
        current.sms_code = Some(String::new());

        let mut ev = event("sms_received");
        ev.sms_status = Some("smsReceived".to_string());
        ev.sms_code = None;
        let result = reconcile(&current, &ev, NOW).unwrap();
        assert_eq!(result, Disposition::Halt(HaltReason::Idempotent));
    }

    #[test]
    fn active_with_code_auto_upgrades_and_carries_payload() {
        let current = activation(LifecycleState::Active);
        let mut ev = event("active");
        ev.sms_code = Some("123456".to_string());
        ev.sms_text = Some("Your code is 123456".to_string());

        let update = apply(reconcile(&current, &ev, NOW).unwrap());
        assert_eq!(update.new_state, LifecycleState::SmsReceived);
        assert_eq!(update.new_sms_status, SmsStatus::SmsReceived);
        assert_eq!(update.sms_code.as_deref(), Some("123456"));
        assert_eq!(update.sms_text.as_deref(), Some("Your code is 123456"));
    }

    #[test]
    fn sms_payload_is_sticky() {
        // An event without a code must not clear the stored one.
        let mut current = activation(LifecycleState::SmsReceived);
        current.sms_status = SmsStatus::SmsReceived;
        current.sms_code = Some("123456".to_string());
        current.sms_text = Some("Your code is 123456".to_string());

        let ev = event("finalized");
        let update = apply(reconcile(&current, &ev, NOW).unwrap());
        assert_eq!(update.new_state, LifecycleState::Finalized);
        assert_eq!(update.sms_code.as_deref(), Some("123456"));
        assert_eq!(update.sms_text.as_deref(), Some("Your code is 123456"));
        assert!(update.should_finalize);
    }

    #[test]
    fn newer_sms_bearing_event_overwrites_payload() {
        let mut current = activation(LifecycleState::SmsReceived);
        current.sms_status = SmsStatus::SmsReceived;
        current.sms_code = Some("111111".to_string());

        let mut ev = event("sms_received");
        ev.sms_status = Some("retryReceived".to_string());
        ev.sms_code = Some("222222".to_string());

        let update = apply(reconcile(&current, &ev, NOW).unwrap());
        assert_eq!(update.new_state, LifecycleState::SmsReceived);
        assert_eq!(update.new_sms_status, SmsStatus::RetryReceived);
        assert_eq!(update.sms_code.as_deref(), Some("222222"));
    }

    #[test]
    fn canceled_records_are_never_resurrected() {
        let current = activation(LifecycleState::Canceled);

        // Regressive/forward noise halts.
        assert!(matches!(
            reconcile(&current, &event("active"), NOW).unwrap(),
            Disposition::Halt(HaltReason::OutOfOrder { .. })
        ));
        assert!(matches!(
            reconcile(&current, &event("expired"), NOW).unwrap(),
            Disposition::Halt(HaltReason::OutOfOrder { .. })
        ));

        // Finalize-after-cancel is a hard integrity failure.
        let result = reconcile(&current, &event("finalized"), NOW);
        assert!(matches!(
            result,
            Err(ReconcileError::Invariant(TransitionError::MutualExclusion))
        ));

        // A duplicate cancel is just idempotent, even with new payload.
        let mut dup = event("canceled");
        dup.sms_code = Some("999999".to_string());
        assert_eq!(
            reconcile(&current, &dup, NOW).unwrap(),
            Disposition::Halt(HaltReason::Idempotent)
        );
    }

    #[test]
    fn finalized_records_reject_changes_as_terminal_mutations() {
        let current = activation(LifecycleState::Finalized);
        let result = reconcile(&current, &event("canceled"), NOW);
        assert!(matches!(
            result,
            Err(ReconcileError::Invariant(
                TransitionError::TerminalMutation { .. }
            ))
        ));
    }

    #[test]
    fn ttl_violations_propagate_as_failures() {
        let current = activation(LifecycleState::Active);
        let mut ev = event("sms_received");
        ev.sms_code = Some("123456".to_string());
        let result = reconcile(&current, &ev, 2_001);
        assert!(matches!(
            result,
            Err(ReconcileError::Invariant(TransitionError::TtlExpired { .. }))
        ));
    }

    #[test]
    fn applying_twice_yields_idempotent_halt_and_identical_record() {
        let current = activation(LifecycleState::Active);
        let mut ev = event("active");
        ev.sms_code = Some("123456".to_string());

        let update = apply(reconcile(&current, &ev, NOW).unwrap());
        let persisted = update.apply_to(&current, NOW);

        // Second delivery of the same event against the persisted record.
        let second = reconcile(&persisted, &ev, NOW).unwrap();
        assert_eq!(second, Disposition::Halt(HaltReason::Idempotent));

        // And the record would be byte-identical if re-applied.
        let again = reconcile(&persisted, &ev, NOW).unwrap();
        assert_eq!(again, Disposition::Halt(HaltReason::Idempotent));
        assert_eq!(persisted, update.apply_to(&current, NOW));
    }

    #[test]
    fn apply_to_stamps_updated_at_only() {
        let current = activation(LifecycleState::Pending);
        let update = apply(reconcile(&current, &event("active"), NOW).unwrap());
        let persisted = update.apply_to(&current, 1_600);
        assert_eq!(persisted.updated_at, 1_600);
        assert_eq!(persisted.created_at, current.created_at);
        assert_eq!(persisted.expires_at, current.expires_at);
        assert_eq!(persisted.state, LifecycleState::Active);
    }
}
