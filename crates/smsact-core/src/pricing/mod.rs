//! Deterministic offer ranking.
//!
//! Given the offers available for a service, [`rank`] filters them under a
//! hard budget ceiling and orders them best-first according to a policy.
//! It performs ranking only: no pricing or billing decisions, no I/O, no
//! randomness. The same inputs always produce the same order (ties keep
//! input order — the sort is stable).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A priced, quality-scored candidate for purchase. Ephemeral: produced
/// fresh per ranking call, with no identity beyond it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Candidate key, typically the country id the number would come from.
    pub id: String,
    /// Asking price. Optional so a malformed upstream offer can be
    /// reported instead of silently dropped.
    pub price: Option<f64>,
    /// Quality score in `[0, 1]`. Absent scores rank as 0.
    pub quality: Option<f64>,
    /// Upstream provider label, when known.
    pub provider_name: Option<String>,
}

/// Ranking strategy applied to the filtered offer set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePolicy {
    /// Ascending by price.
    #[default]
    Cheapest,
    /// Descending by `quality_weight * quality - price_weight * price`.
    ///
    /// A deliberately simple linear scalarization, not a normalized
    /// multi-objective optimum; tune it through the weights.
    Balanced,
    /// Descending by quality.
    BestQuality,
}

impl PricePolicy {
    /// Canonical spelling, as used in config files and CLI flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cheapest => "cheapest",
            Self::Balanced => "balanced",
            Self::BestQuality => "best_quality",
        }
    }
}

impl fmt::Display for PricePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricePolicy {
    type Err = SelectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cheapest" => Ok(Self::Cheapest),
            "balanced" => Ok(Self::Balanced),
            "best_quality" | "best-quality" => Ok(Self::BestQuality),
            other => Err(SelectorError::UnknownPolicy {
                policy: other.to_string(),
            }),
        }
    }
}

/// Constraints and policy for one ranking call.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorOptions {
    /// Ranking strategy.
    pub policy: PricePolicy,
    /// Hard budget ceiling. Offers above it are excluded for every policy;
    /// the ceiling is never a soft preference.
    pub max_price: f64,
    /// Quality weight for [`PricePolicy::Balanced`]. Defaults to 0.5.
    pub quality_weight: Option<f64>,
    /// Price weight for [`PricePolicy::Balanced`]. Defaults to 0.5.
    pub price_weight: Option<f64>,
}

impl SelectorOptions {
    /// Options with default weights for the given policy and ceiling.
    #[must_use]
    pub const fn new(policy: PricePolicy, max_price: f64) -> Self {
        Self {
            policy,
            max_price,
            quality_weight: None,
            price_weight: None,
        }
    }
}

/// Ranking failures. All of them propagate to the purchasing workflow as
/// explicit failed outcomes; a fallback offer is never substituted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectorError {
    /// The input offer list was empty.
    #[error("input offers list is empty")]
    EmptyInput,

    /// The budget ceiling is not positive.
    #[error("max_price must be positive (got {max_price})")]
    InvalidBudget {
        /// The rejected ceiling.
        max_price: f64,
    },

    /// An offer arrived without a price. Checked before filtering so a
    /// malformed offer is reported even if the ceiling would have
    /// excluded it anyway.
    #[error("offer {id} is missing a price")]
    MissingPrice {
        /// Id of the malformed offer.
        id: String,
    },

    /// Every offer was filtered out by the budget ceiling.
    #[error("no offers available under max_price {max_price}")]
    NoViableOffers {
        /// The ceiling that excluded everything.
        max_price: f64,
    },

    /// The policy string did not name a known policy.
    #[error("unknown price policy: {policy}")]
    UnknownPolicy {
        /// The unrecognized spelling.
        policy: String,
    },
}

/// Filters and ranks `offers` under `options`, best-first.
///
/// # Errors
///
/// [`SelectorError::EmptyInput`], [`SelectorError::InvalidBudget`],
/// [`SelectorError::MissingPrice`] (pre-filter), or
/// [`SelectorError::NoViableOffers`] when the ceiling excludes everything.
pub fn rank(offers: &[Offer], options: &SelectorOptions) -> Result<Vec<Offer>, SelectorError> {
    if offers.is_empty() {
        return Err(SelectorError::EmptyInput);
    }
    if options.max_price <= 0.0 {
        return Err(SelectorError::InvalidBudget {
            max_price: options.max_price,
        });
    }
    if let Some(malformed) = offers.iter().find(|offer| offer.price.is_none()) {
        return Err(SelectorError::MissingPrice {
            id: malformed.id.clone(),
        });
    }

    let mut viable: Vec<Offer> = offers
        .iter()
        .filter(|offer| price_of(offer) <= options.max_price)
        .cloned()
        .collect();
    if viable.is_empty() {
        return Err(SelectorError::NoViableOffers {
            max_price: options.max_price,
        });
    }

    match options.policy {
        PricePolicy::Cheapest => {
            viable.sort_by(|a, b| total_order(price_of(a), price_of(b)));
        }
        PricePolicy::BestQuality => {
            viable.sort_by(|a, b| total_order(quality_of(b), quality_of(a)));
        }
        PricePolicy::Balanced => {
            let quality_weight = options.quality_weight.unwrap_or(0.5);
            let price_weight = options.price_weight.unwrap_or(0.5);
            let score = |offer: &Offer| {
                quality_weight * quality_of(offer) - price_weight * price_of(offer)
            };
            viable.sort_by(|a, b| total_order(score(b), score(a)));
        }
    }

    Ok(viable)
}

fn price_of(offer: &Offer) -> f64 {
    // Presence was validated before filtering.
    offer.price.unwrap_or(f64::INFINITY)
}

fn quality_of(offer: &Offer) -> f64 {
    offer.quality.unwrap_or(0.0)
}

fn total_order(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}
