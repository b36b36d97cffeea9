//! Activation aggregate and lifecycle state machine.
//!
//! An activation is a rented phone number tracked from purchase to
//! completion. Its state only ever moves forward along the graph below;
//! out-of-order observations are the caller's problem (see
//! [`crate::reconcile`]), never the state machine's.
//!
//! # State machine
//!
//! ```text
//!  ┌─────────┐      ┌────────┐      ┌──────────────┐      ┌───────────┐
//!  │ Pending │─────▶│ Active │─────▶│ SmsReceived  │─────▶│ Finalized │
//!  └────┬────┘      └───┬────┘      └──────┬───────┘      └───────────┘
//!       │               │    ╲             │
//!       │               │     ╲            │
//!       ▼               ▼      ▼           ▼
//!  ┌──────────┐   ┌──────────┐ ┌─────────┐
//!  │ Canceled │   │ Canceled │ │ Expired │ ... Canceled
//!  └──────────┘   └──────────┘ └─────────┘
//! ```
//!
//! # Valid transitions
//!
//! | From | To |
//! |------|----|
//! | Pending | Active, Canceled |
//! | Active | SmsReceived, Canceled, Expired |
//! | SmsReceived | Finalized, Canceled |
//! | Finalized / Canceled / Expired | (terminal) |
//!
//! Self-transitions are always legal and act as identity, and forward
//! jumps over skipped intermediate states are legal too (legality is
//! reachability along the graph, not single edges — unordered channels may
//! report a later state first). Everything else is rejected by
//! [`state::transition`] with a [`TransitionError`] naming the violated
//! invariant:
//!
//! - **Terminal immutability** — a finalized record never changes again.
//! - **Mutual exclusion** — a canceled record can never be finalized, as a
//!   distinct error even though the table already forbids it, so a future
//!   table edit cannot silently re-open that path.
//! - **Monotonicity** — only states reachable in the graph are legal
//!   targets; backward moves never are.
//! - **Absolute TTL** — past `expires_at` only Canceled and Expired remain
//!   reachable.

pub mod error;
pub mod state;

pub use error::TransitionError;
pub use state::{LifecycleState, SmsStatus, transition};

use serde::{Deserialize, Serialize};

/// A rented phone-number activation, the aggregate root of this crate.
///
/// Created in `Pending` state when the remote marketplace acknowledges an
/// activation request. From then on it is mutated exclusively through
/// [`crate::reconcile::StateUpdate`] instructions; it is never deleted,
/// only driven into a terminal state. Once terminal, every field except
/// `updated_at` is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    /// Remote-assigned activation id. Immutable once created.
    pub id: String,

    /// Caller-assigned correlation id (the order id sent with the
    /// activation request). Unique when present.
    pub external_id: Option<String>,

    /// Leased phone number, E.164 formatted.
    pub phone: String,

    /// Service the number was leased for.
    pub service_id: String,

    /// Country the number belongs to.
    pub country_id: String,

    /// Current lifecycle state.
    pub state: LifecycleState,

    /// Current SMS delivery status.
    pub sms_status: SmsStatus,

    /// Price reserved/consumed for this activation.
    pub price: f64,

    /// Price ceiling agreed at creation. Never changes.
    pub max_price: f64,

    /// Verification code extracted from the received SMS. `None` until the
    /// first SMS-bearing event; only overwritten by a newer SMS-bearing
    /// event, never cleared.
    pub sms_code: Option<String>,

    /// Full text of the received SMS. Same overwrite rules as `sms_code`.
    pub sms_text: Option<String>,

    /// Creation time, unix seconds.
    pub created_at: u64,

    /// Last mutation time, unix seconds. Bookkeeping only; updating it is
    /// the repository-aware caller's job.
    pub updated_at: u64,

    /// Absolute deadline, unix seconds. Fixed at creation, never extended;
    /// `expires_at >= created_at` always holds.
    pub expires_at: u64,

    /// Whether the remote side allows requesting another SMS on this
    /// number.
    pub is_retriable: bool,
}

impl Activation {
    /// Returns `true` once the activation has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns `true` while the activation still participates in poll
    /// passes (i.e. it is not terminal).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}
