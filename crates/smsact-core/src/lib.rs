//! Core domain logic for smsact, a lifecycle manager for rented
//! phone-number activations used in one-time SMS verification.
//!
//! Two asynchronous channels report on an activation's progress: a push
//! channel (inbound webhooks) and a pull channel (periodic reconciliation
//! against the remote marketplace API). Both are normalized into the same
//! vocabulary and routed through a single transition authority, so the
//! channels can never disagree in their effect on local state.
//!
//! # Module map
//!
//! - [`activation`] — the `Activation` aggregate and the invariant-checking
//!   lifecycle state machine.
//! - [`reconcile`] — event normalization and the reconciliation engine that
//!   turns a channel observation into an apply/halt/fail decision.
//! - [`pricing`] — deterministic offer ranking under a budget ceiling.
//! - [`workflow`] — the purchase pipeline (fetch, rank, gate, execute).
//! - [`repository`] — activation persistence (in-memory and SQLite).
//! - [`gateway`] — the remote marketplace client (trait, HTTP, mock).
//! - [`webhook`] — inbound payload types, response mapping, ingress rate
//!   limiting.
//! - [`poll`] — the reconciliation worker that drives the pull channel.
//! - [`config`] — TOML configuration.
//!
//! Everything in [`activation`], [`reconcile`] and [`pricing`] is pure and
//! synchronous: `now` is always an explicit argument and no function there
//! performs I/O.

pub mod activation;
pub mod config;
pub mod gateway;
pub mod poll;
pub mod pricing;
pub mod reconcile;
pub mod repository;
pub mod webhook;
pub mod workflow;
