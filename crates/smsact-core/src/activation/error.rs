//! Lifecycle transition error types.

use thiserror::Error;

use super::state::LifecycleState;

/// Errors returned by [`super::state::transition`].
///
/// Each variant names one violated invariant. Callers that merge
/// at-least-once channels treat `IllegalTransition` as expected
/// out-of-order noise and everything else as a genuine integrity problem
/// (see [`crate::reconcile`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// A finalized activation was asked to change state.
    #[error("attempted to mutate a finalized activation (requested {requested})")]
    TerminalMutation {
        /// The state that was requested.
        requested: LifecycleState,
    },

    /// Cancel and finalize are mutually exclusive outcomes.
    ///
    /// The transition table already forbids `Canceled -> Finalized`
    /// because `Canceled` is terminal; this dedicated error keeps the
    /// guarantee even if the table is ever edited.
    #[error("mutually exclusive: cannot finalize a canceled activation")]
    MutualExclusion,

    /// The requested state is not reachable from the current state.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// State the activation is currently in.
        from: LifecycleState,
        /// State that was requested.
        to: LifecycleState,
    },

    /// The activation's absolute deadline has passed; only cancellation
    /// and expiry remain legal.
    #[error("ttl expired: transition to {requested} is forbidden after {expires_at}")]
    TtlExpired {
        /// State that was requested.
        requested: LifecycleState,
        /// The activation's fixed deadline, unix seconds.
        expires_at: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_states_involved() {
        let err = TransitionError::IllegalTransition {
            from: LifecycleState::Active,
            to: LifecycleState::Pending,
        };
        assert!(err.to_string().contains("active"));
        assert!(err.to_string().contains("pending"));

        let err = TransitionError::TtlExpired {
            requested: LifecycleState::SmsReceived,
            expires_at: 1_700,
        };
        assert!(err.to_string().contains("1700"));
    }
}
