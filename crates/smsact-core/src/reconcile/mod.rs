//! Dual-channel reconciliation.
//!
//! Both information channels — inbound webhooks (push) and the poll worker
//! (pull) — report on an activation's progress with at-least-once,
//! unordered delivery. This module is the single authority that merges
//! them: each observation is normalized into a [`ChannelEvent`], run
//! through [`engine::reconcile`], and answered with exactly one of three
//! outcomes:
//!
//! - **Apply** — a valid, non-duplicate change; the caller persists the
//!   returned [`StateUpdate`] instruction.
//! - **Halt** — well-formed but uninteresting: a duplicate, an
//!   out-of-order/regressive delivery, or an event outside the lifecycle
//!   vocabulary. Halts are expected traffic and are never escalated,
//!   retried, or logged as errors.
//! - **Error** — an invariant was actually violated (terminal mutation,
//!   mutual exclusion, TTL breach, id mismatch). These indicate an
//!   upstream bug or a data-integrity problem and are surfaced to the
//!   operator.
//!
//! The engine is read-then-decide with no built-in compare-and-swap, so
//! callers must serialize the read → reconcile → persist cycle per
//! activation id; [`IdLockMap`] provides that discipline. Different ids
//! reconcile independently and may run concurrently.

pub mod engine;
pub mod locks;
pub mod normalize;

pub use engine::{
    ChannelEvent, Disposition, HaltReason, ReconcileError, StateUpdate, reconcile,
};
pub use locks::IdLockMap;
pub use normalize::{NormalizedEvent, normalize};
