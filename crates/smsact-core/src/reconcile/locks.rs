//! Per-activation serialization.
//!
//! The engine is read-then-decide: two callers racing on the same id can
//! both load the same stale record and independently decide to apply stale
//! updates. Callers therefore hold the activation's lock across the whole
//! read → reconcile → persist cycle. Different ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A map of per-activation-id mutexes shared by every channel that writes
/// activations (webhook handler, poll worker, manual operations).
#[derive(Debug, Default)]
pub struct IdLockMap {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLockMap {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding `id`, creating it on first use.
    ///
    /// The caller locks the returned mutex for the duration of its
    /// read-reconcile-write sequence.
    #[must_use]
    pub fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drops locks nobody is holding, bounding memory across long runs.
    /// Poll passes call this once per pass.
    pub fn prune(&self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of ids currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no ids are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
