//! The poll (pull) channel: periodic reconciliation against the remote
//! marketplace.
//!
//! Polling is reconciliation only — it never decides anything the webhook
//! channel could not. Every snapshot is reduced to the same
//! [`ChannelEvent`](crate::reconcile::ChannelEvent) shape and pushed
//! through [`reconcile`](crate::reconcile::reconcile), so the two channels
//! share one authority by construction.
//!
//! Back-pressure rules:
//!
//! - Once the active set exceeds the pacing threshold, a small delay is
//!   inserted between remote reads to stay under the marketplace's rate
//!   limiter.
//! - A rate-limit signal aborts the remainder of the pass instead of
//!   retrying; unprocessed ids are simply picked up next pass, which is
//!   safe because the engine is idempotent and order-tolerant.

use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::activation::LifecycleState;
use crate::config::PollConfig;
use crate::gateway::{ActivationGateway, GatewayError};
use crate::reconcile::{Disposition, IdLockMap, ReconcileError, reconcile};
use crate::repository::{ActivationRepository, RepositoryError};

/// Counters for one pass over the active set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Ids synced without error (changed or not).
    pub processed: usize,
    /// Ids whose record actually changed.
    pub changed: usize,
    /// Ids that failed, including the unprocessed remainder after a
    /// rate-limit abort.
    pub failures: usize,
}

/// What happened to a single id during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The record moved forward.
    Updated {
        /// State before.
        from: LifecycleState,
        /// State after.
        to: LifecycleState,
    },
    /// Nothing to do (duplicate, out-of-order, unknown status).
    Unchanged,
    /// The record vanished locally or already terminated between the
    /// active-set scan and the sync.
    Skipped,
}

/// Failures while syncing a single id.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Storage failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The remote read failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Reconciliation surfaced an integrity violation.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Drives the pull channel: scans the active set and reconciles each
/// record against its remote snapshot.
pub struct ReconciliationWorker {
    repository: Arc<dyn ActivationRepository>,
    gateway: Arc<dyn ActivationGateway>,
    locks: Arc<IdLockMap>,
    config: PollConfig,
}

impl ReconciliationWorker {
    /// Creates a worker. `locks` must be the same map the webhook handler
    /// uses, so the two channels serialize per activation id.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ActivationRepository>,
        gateway: Arc<dyn ActivationGateway>,
        locks: Arc<IdLockMap>,
        config: PollConfig,
    ) -> Self {
        Self {
            repository,
            gateway,
            locks,
            config,
        }
    }

    /// Performs one synchronization pass over all non-terminal records.
    ///
    /// The pass has no intrinsic deadline; callers bound it by wall-clock
    /// if they must. Any id left unprocessed is reported as a failure and
    /// picked up on the next pass.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] when the active set cannot be read at all.
    /// Per-id failures are counted in the stats, not returned.
    pub fn sync_pass(&self, now: u64) -> Result<PassStats, RepositoryError> {
        let active = self.repository.find_active()?;
        let total = active.len();
        tracing::info!(count = total, "starting sync pass");

        let mut stats = PassStats::default();
        for (index, activation) in active.iter().enumerate() {
            match self.sync_one(&activation.id, now) {
                Ok(SyncOutcome::Updated { from, to }) => {
                    stats.processed += 1;
                    stats.changed += 1;
                    tracing::info!(
                        activation_id = %activation.id,
                        %from,
                        %to,
                        "reconciled"
                    );
                }
                Ok(_) => stats.processed += 1,
                Err(SyncError::Gateway(error)) if error.is_rate_limited() => {
                    // Back-pressure, not busy-retry: the rest of the batch
                    // waits for the next pass.
                    stats.failures += total - index;
                    tracing::error!(
                        remaining = total - index,
                        "marketplace rate limit hit; aborting sync pass"
                    );
                    self.locks.prune();
                    return Ok(stats);
                }
                Err(error) => {
                    stats.failures += 1;
                    tracing::error!(
                        activation_id = %activation.id,
                        %error,
                        "failed to sync activation"
                    );
                }
            }

            if total > self.config.pacing_threshold && index + 1 < total {
                thread::sleep(Duration::from_millis(self.config.pacing_delay_ms));
            }
        }

        self.locks.prune();
        tracing::info!(
            processed = stats.processed,
            changed = stats.changed,
            failures = stats.failures,
            "sync pass finished"
        );
        Ok(stats)
    }

    /// Syncs a single activation from its remote snapshot, holding the
    /// id's lock across the whole read-reconcile-write sequence.
    ///
    /// # Errors
    ///
    /// [`SyncError`] on storage, gateway, or integrity failure.
    pub fn sync_one(&self, id: &str, now: u64) -> Result<SyncOutcome, SyncError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(local) = self.repository.find_by_id(id)? else {
            return Ok(SyncOutcome::Skipped);
        };
        if local.is_terminal() {
            // Terminated by the other channel since the active-set scan.
            return Ok(SyncOutcome::Skipped);
        }

        let remote = match self.gateway.get_activation(id) {
            Ok(remote) => remote,
            Err(error) => {
                if error.is_not_found() {
                    // Doctrine: never fabricate a terminal transition for a
                    // ghost; leave the record for manual verification.
                    tracing::warn!(
                        activation_id = %id,
                        "ghost activation: present locally, missing remotely"
                    );
                }
                return Err(error.into());
            }
        };

        let event = remote.to_channel_event();
        match reconcile(&local, &event, now)? {
            Disposition::Apply(update) => {
                let from = local.state;
                let updated = update.apply_to(&local, now);
                self.repository.save(&updated)?;
                Ok(SyncOutcome::Updated {
                    from,
                    to: updated.state,
                })
            }
            Disposition::Halt(reason) => {
                tracing::debug!(activation_id = %id, %reason, "sync absorbed");
                Ok(SyncOutcome::Unchanged)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{Activation, SmsStatus};
    use crate::gateway::{MockActivationGateway, NewActivationRequest, RemoteActivation};
    use crate::repository::InMemoryActivationRepository;

    const NOW: u64 = 1_500;

    fn fast_config() -> PollConfig {
        PollConfig {
            interval_secs: 30,
            pacing_threshold: 100,
            pacing_delay_ms: 0,
        }
    }

    fn local(id: &str, state: LifecycleState) -> Activation {
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
            expires_at: 2_000,
            is_retriable: false,
        }
    }

    fn remote(id: &str, status: &str) -> RemoteActivation {
        RemoteActivation {
            activation_id: id.to_string(),
            order_id: None,
            phone: "+15550001111".to_string(),
            service_id: "svc-wa".to_string(),
            country_id: "us".to_string(),
            activation_status: status.to_string(),
            sms_status: None,
            sms_code: None,
            sms_text: None,
            price: 0.35,
            max_price: Some(0.50),
            created_at: 1_000,
            updated_at: 1_200,
            expire_at: 2_000,
            is_retriable: None,
        }
    }

    fn worker(
        repository: Arc<InMemoryActivationRepository>,
        gateway: Arc<MockActivationGateway>,
    ) -> ReconciliationWorker {
        ReconciliationWorker::new(repository, gateway, Arc::new(IdLockMap::new()), fast_config())
    }

    #[test]
    fn pass_reconciles_remote_progress() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());
        repository
            .save(&local("act-1", LifecycleState::Pending))
            .unwrap();
        gateway.insert_activation(remote("act-1", "active"));

        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        let stats = worker.sync_pass(NOW).unwrap();

        assert_eq!(
            stats,
            PassStats {
                processed: 1,
                changed: 1,
                failures: 0
            }
        );
        let stored = repository.find_by_id("act-1").unwrap().unwrap();
        assert_eq!(stored.state, LifecycleState::Active);
        assert_eq!(stored.updated_at, NOW);
    }

    #[test]
    fn second_pass_is_idempotent() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());
        repository
            .save(&local("act-1", LifecycleState::Pending))
            .unwrap();
        gateway.insert_activation(remote("act-1", "active"));

        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        worker.sync_pass(NOW).unwrap();
        let before = repository.find_by_id("act-1").unwrap();

        let stats = worker.sync_pass(NOW).unwrap();
        assert_eq!(stats.changed, 0);
        assert_eq!(stats.processed, 1);
        assert_eq!(repository.find_by_id("act-1").unwrap(), before);
    }

    #[test]
    fn rate_limit_aborts_the_remainder_of_the_pass() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());
        for id in ["act-1", "act-2", "act-3"] {
            repository.save(&local(id, LifecycleState::Pending)).unwrap();
            gateway.insert_activation(remote(id, "active"));
        }
        gateway.fail_on(
            "get_activation:act-2",
            GatewayError::RateLimited {
                retry_after: Some(30),
            },
        );

        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        let stats = worker.sync_pass(NOW).unwrap();

        assert_eq!(
            stats,
            PassStats {
                processed: 1,
                changed: 1,
                failures: 2
            }
        );
        // act-3 was never read: the batch aborted instead of retrying.
        assert!(
            !gateway
                .calls()
                .iter()
                .any(|call| call == "get_activation:act-3")
        );
        // Untouched records are picked up cleanly on the next pass.
        let stats = worker.sync_pass(NOW).unwrap();
        assert_eq!(stats.changed, 2);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn ghost_activation_counts_as_failure_and_stays_untouched() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());
        repository
            .save(&local("act-ghost", LifecycleState::Active))
            .unwrap();

        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        let stats = worker.sync_pass(NOW).unwrap();

        assert_eq!(stats.failures, 1);
        assert_eq!(
            repository.find_by_id("act-ghost").unwrap().unwrap().state,
            LifecycleState::Active
        );
    }

    #[test]
    fn integrity_violations_count_as_failures_without_mutation() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());
        repository
            .save(&local("act-1", LifecycleState::Active))
            .unwrap();
        let mut snapshot = remote("act-1", "sms_received");
        snapshot.sms_code = Some("123456".to_string());
        gateway.insert_activation(snapshot);

        // Past the deadline, progress is an integrity violation.
        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        let stats = worker.sync_pass(2_001).unwrap();

        assert_eq!(stats.failures, 1);
        assert_eq!(stats.changed, 0);
        assert_eq!(
            repository.find_by_id("act-1").unwrap().unwrap().state,
            LifecycleState::Active
        );
    }

    #[test]
    fn purchased_activation_flows_through_the_poll_channel() {
        let repository = Arc::new(InMemoryActivationRepository::new());
        let gateway = Arc::new(MockActivationGateway::new());

        let snapshot = gateway
            .request_activation(&NewActivationRequest {
                service_id: "svc-wa".to_string(),
                country_id: "us".to_string(),
                max_price: 0.5,
                order_id: "ord-1".to_string(),
            })
            .unwrap();
        repository.save(&snapshot.to_activation().unwrap()).unwrap();

        gateway.set_remote_status(&snapshot.activation_id, "active", Some("654321"));

        let worker = worker(Arc::clone(&repository), Arc::clone(&gateway));
        let stats = worker.sync_pass(1_100).unwrap();
        assert_eq!(stats.changed, 1);

        // active + code upgrades straight to SmsReceived.
        let stored = repository
            .find_by_id(&snapshot.activation_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, LifecycleState::SmsReceived);
        assert_eq!(stored.sms_code.as_deref(), Some("654321"));
    }
}
