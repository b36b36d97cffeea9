//! Shared daemon state.

use std::sync::Arc;

use smsact_core::gateway::ActivationGateway;
use smsact_core::reconcile::IdLockMap;
use smsact_core::repository::ActivationRepository;
use smsact_core::webhook::{IngressRateLimiter, RateLimitConfig};

/// Handles shared by the webhook handlers and the poll worker.
///
/// The lock map is the piece that makes sharing safe: both channels
/// serialize their read-reconcile-write cycles on the same per-activation
/// mutexes.
pub struct DaemonState {
    /// Activation storage.
    pub repository: Arc<dyn ActivationRepository>,
    /// Marketplace client.
    pub gateway: Arc<dyn ActivationGateway>,
    /// Ingress rate limiter for the webhook endpoint.
    pub limiter: IngressRateLimiter,
    /// Per-activation-id locks, shared with the poll worker.
    pub locks: Arc<IdLockMap>,
}

impl DaemonState {
    /// Creates the shared state.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ActivationRepository>,
        gateway: Arc<dyn ActivationGateway>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            repository,
            gateway,
            limiter: IngressRateLimiter::new(rate_limit),
            locks: Arc::new(IdLockMap::new()),
        }
    }
}

/// The state type axum handlers extract.
pub type SharedState = Arc<DaemonState>;
