//! The purchase workflow.
//!
//! A straight pipeline: validate the request, fetch availability, map it
//! into offers, rank under the budget ceiling, pass the safety gate, and
//! only then touch the marketplace with a write. Dry-run mode halts at the
//! gate — it is the one and only place execution is withheld, so every
//! earlier step behaves identically in both modes.
//!
//! Ranking failures propagate as failed outcomes; a fallback offer is
//! never substituted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::activation::Activation;
use crate::gateway::{ActivationGateway, GatewayError, NewActivationRequest};
use crate::pricing::{Offer, PricePolicy, SelectorError, SelectorOptions, rank};

/// Whether the workflow is allowed to spend money.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Rank and gate, then halt before any remote write. The default:
    /// spending requires an explicit opt-in.
    #[default]
    DryRun,
    /// Execute the purchase.
    Live,
}

/// One purchase attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    /// Service to lease a number for.
    pub service_id: String,
    /// Ranking policy.
    pub policy: PricePolicy,
    /// Budget ceiling, also sent to the marketplace as `max_price`.
    pub max_price: f64,
    /// Quality weight for the balanced policy.
    pub quality_weight: Option<f64>,
    /// Price weight for the balanced policy.
    pub price_weight: Option<f64>,
    /// Dry-run or live.
    pub mode: ExecutionMode,
    /// Correlation id to send; a fresh UUID when absent.
    pub order_id: Option<String>,
}

impl PurchaseRequest {
    /// A request with defaults (dry-run, no weight overrides).
    #[must_use]
    pub fn new(service_id: impl Into<String>, policy: PricePolicy, max_price: f64) -> Self {
        Self {
            service_id: service_id.into(),
            policy,
            max_price,
            quality_weight: None,
            price_weight: None,
            mode: ExecutionMode::DryRun,
            order_id: None,
        }
    }

    /// Switches the request to live execution.
    #[must_use]
    pub const fn live(mut self) -> Self {
        self.mode = ExecutionMode::Live;
        self
    }
}

/// What a completed pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// A live purchase went through; the caller persists this record.
    Purchased {
        /// The freshly created (pending) activation.
        activation: Activation,
    },
    /// The pipeline stopped on purpose (dry-run gate).
    Halted {
        /// Human-readable explanation.
        reason: String,
    },
}

/// Purchase pipeline failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    /// The request itself was unusable.
    #[error("invalid purchase request: {reason}")]
    InvalidRequest {
        /// What was wrong.
        reason: String,
    },

    /// The marketplace reported no availability at all for the service.
    #[error("no availability for service {service_id}")]
    NoAvailability {
        /// The service that came up empty.
        service_id: String,
    },

    /// Ranking rejected the offer set.
    #[error(transparent)]
    Selection(#[from] SelectorError),

    /// A remote call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The safety gate caught a winner above the ceiling.
    #[error("safety gate: offer price {price} exceeds budget {max_price}")]
    BudgetExceeded {
        /// The winning offer's price.
        price: f64,
        /// The configured ceiling.
        max_price: f64,
    },
}

/// Maps marketplace availability into rankable offers: the country
/// becomes the offer id and the low end of the price band the asking
/// price.
#[must_use]
pub fn offers_from_availability(availability: &[crate::gateway::Availability]) -> Vec<Offer> {
    availability
        .iter()
        .map(|entry| Offer {
            id: entry.country_id.clone(),
            price: Some(entry.price.min),
            quality: entry.quality.map(|quality| quality.avg),
            provider_name: None,
        })
        .collect()
}

/// Runs the purchase pipeline.
///
/// On `Purchased`, the returned activation is the caller's to persist;
/// the workflow itself never touches storage.
///
/// # Errors
///
/// Any [`WorkflowError`]. Gateway and ranking failures pass through
/// unchanged so callers can react to the distinguishable signals (rate
/// limit, price conflict, no viable offers).
pub fn run_purchase(
    request: &PurchaseRequest,
    gateway: &dyn ActivationGateway,
) -> Result<PurchaseOutcome, WorkflowError> {
    if request.service_id.trim().is_empty() {
        return Err(WorkflowError::InvalidRequest {
            reason: "service_id is missing".to_string(),
        });
    }
    if request.max_price <= 0.0 {
        return Err(WorkflowError::InvalidRequest {
            reason: "max_price must be positive".to_string(),
        });
    }

    let availability = gateway.get_prices(&request.service_id)?;
    if availability.is_empty() {
        return Err(WorkflowError::NoAvailability {
            service_id: request.service_id.clone(),
        });
    }

    let offers = offers_from_availability(&availability);

    let options = SelectorOptions {
        policy: request.policy,
        max_price: request.max_price,
        quality_weight: request.quality_weight,
        price_weight: request.price_weight,
    };
    let ranked = rank(&offers, &options)?;
    let Some(winner) = ranked.into_iter().next() else {
        // rank() guarantees a non-empty result; keep the gate closed anyway.
        return Err(WorkflowError::Selection(SelectorError::NoViableOffers {
            max_price: request.max_price,
        }));
    };
    let winner_price = winner.price.unwrap_or(f64::INFINITY);
    tracing::debug!(
        service_id = %request.service_id,
        policy = %request.policy,
        country_id = %winner.id,
        price = winner_price,
        "offer selected"
    );

    if winner_price > request.max_price {
        return Err(WorkflowError::BudgetExceeded {
            price: winner_price,
            max_price: request.max_price,
        });
    }
    if request.mode != ExecutionMode::Live {
        return Ok(PurchaseOutcome::Halted {
            reason: format!(
                "dry-run: would lease a {} number in {} at {:.4}",
                request.service_id, winner.id, winner_price
            ),
        });
    }

    let order_id = request
        .order_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let snapshot = gateway.request_activation(&NewActivationRequest {
        service_id: request.service_id.clone(),
        country_id: winner.id.clone(),
        max_price: request.max_price,
        order_id,
    })?;
    let activation = snapshot.to_activation()?;
    tracing::info!(
        activation_id = %activation.id,
        country_id = %activation.country_id,
        price = activation.price,
        "activation purchased"
    );

    Ok(PurchaseOutcome::Purchased { activation })
}
