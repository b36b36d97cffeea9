//! Lifecycle states and the invariant-checking transition function.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Activation;
use super::error::TransitionError;

/// Lifecycle state of an activation.
///
/// Serialized in snake_case; the same spelling is used on the marketplace
/// wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created locally, not yet acknowledged as live by the remote side.
    Pending,
    /// Number is live and waiting for an SMS.
    Active,
    /// An SMS has been delivered to the number.
    SmsReceived,
    /// Activation completed and settled. Terminal.
    Finalized,
    /// Activation canceled before completion. Terminal.
    Canceled,
    /// Activation ran past its deadline without completing. Terminal.
    Expired,
}

impl LifecycleState {
    /// All states, in graph order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Active,
        Self::SmsReceived,
        Self::Finalized,
        Self::Canceled,
        Self::Expired,
    ];

    /// Wire/storage spelling of this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::SmsReceived => "sms_received",
            Self::Finalized => "finalized",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    /// Parses a wire/storage spelling, case-insensitively.
    ///
    /// Returns `None` for anything outside the lifecycle vocabulary.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "sms_received" | "smsreceived" => Some(Self::SmsReceived),
            "finalized" => Some(Self::Finalized),
            "canceled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Returns `true` for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Canceled | Self::Expired)
    }

    /// The directed legal-transition table. This is the single source of
    /// truth for lifecycle ordering; monotonicity checks are derived from
    /// it rather than from a parallel ordering list.
    #[must_use]
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Active, Self::Canceled],
            Self::Active => &[Self::SmsReceived, Self::Canceled, Self::Expired],
            Self::SmsReceived => &[Self::Finalized, Self::Canceled],
            Self::Finalized | Self::Canceled | Self::Expired => &[],
        }
    }

    /// Returns `true` if `target` is reachable from `self` along the
    /// transition graph, in any number of steps. Self-transitions are
    /// always permitted (identity).
    ///
    /// Monotonicity is checked against reachability rather than single
    /// edges: channels deliver unordered, so a record may legitimately
    /// learn about a later state before the intermediate one (e.g. an SMS
    /// arrives while the record still says `Pending`). Backward moves are
    /// never reachable and stay rejected.
    #[must_use]
    pub fn permits(self, target: Self) -> bool {
        self == target
            || self
                .allowed_targets()
                .iter()
                .any(|&next| next == target || next.permits(target))
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SMS delivery status of an activation.
///
/// Serialized in the marketplace's camelCase spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SmsStatus {
    /// No SMS activity yet.
    None,
    /// An SMS has been requested from the remote side.
    SmsRequested,
    /// An SMS has been delivered.
    SmsReceived,
    /// A retry SMS has been delivered.
    RetryReceived,
}

impl SmsStatus {
    /// Wire/storage spelling of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SmsRequested => "smsRequested",
            Self::SmsReceived => "smsReceived",
            Self::RetryReceived => "retryReceived",
        }
    }

    /// Parses a wire/storage spelling, case-insensitively.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "smsrequested" => Some(Self::SmsRequested),
            "smsreceived" => Some(Self::SmsReceived),
            "retryreceived" => Some(Self::RetryReceived),
            _ => None,
        }
    }
}

impl fmt::Display for SmsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempts a lifecycle transition, enforcing every invariant.
///
/// A self-transition (requested state equals the current state) is always
/// legal and acts as identity on the state field. Actual state changes run
/// through the gates in a fixed order:
///
/// 1. Terminal immutability: a `Finalized` record rejects any change.
/// 2. Mutual exclusion: `Canceled -> Finalized` is rejected with its own
///    error code even though the table also forbids it.
/// 3. Monotonicity: the requested state must be reachable from the
///    current state along the transition graph (forward jumps over
///    skipped intermediate states are legal, backward moves are not).
/// 4. Absolute TTL: once `now >= expires_at`, only `Canceled` and
///    `Expired` remain reachable.
///
/// On success returns a copy of `current` with the new state and SMS
/// status applied. No side effects; `now` is an explicit input so callers
/// from both channels observe the same clock.
///
/// # Errors
///
/// Returns the [`TransitionError`] naming the first violated invariant.
pub fn transition(
    current: &Activation,
    next_state: LifecycleState,
    next_sms_status: SmsStatus,
    now: u64,
) -> Result<Activation, TransitionError> {
    if next_state == current.state {
        // Identity: duplicate deliveries of the current state are legal in
        // every state, including terminal ones, and past the TTL.
        return Ok(Activation {
            sms_status: next_sms_status,
            ..current.clone()
        });
    }

    if current.state == LifecycleState::Finalized {
        return Err(TransitionError::TerminalMutation {
            requested: next_state,
        });
    }

    if current.state == LifecycleState::Canceled && next_state == LifecycleState::Finalized {
        return Err(TransitionError::MutualExclusion);
    }

    if !current.state.permits(next_state) {
        return Err(TransitionError::IllegalTransition {
            from: current.state,
            to: next_state,
        });
    }

    if now >= current.expires_at
        && next_state != LifecycleState::Canceled
        && next_state != LifecycleState::Expired
    {
        return Err(TransitionError::TtlExpired {
            requested: next_state,
            expires_at: current.expires_at,
        });
    }

    Ok(Activation {
        state: next_state,
        sms_status: next_sms_status,
        ..current.clone()
    })
}
