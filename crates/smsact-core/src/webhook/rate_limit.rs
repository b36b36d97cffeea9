//! Ingress rate limiting for the webhook endpoint.
//!
//! A sliding-window limiter keyed by source IP. Two bounds keep memory
//! finite under hostile traffic: expired timestamps are pruned whenever an
//! entry is touched, and the number of tracked sources is hard-capped —
//! when the cap is hit, a full prune runs, and if the map is still full a
//! new source is rejected outright.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::WebhookError;

/// Limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per source within the window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window size in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Hard cap on distinct sources tracked at once.
    #[serde(default = "default_max_tracked_sources")]
    pub max_tracked_sources: usize,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_tracked_sources() -> usize {
    4_096
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            max_tracked_sources: default_max_tracked_sources(),
        }
    }
}

/// Sliding-window rate limiter for inbound webhook deliveries.
#[derive(Debug)]
pub struct IngressRateLimiter {
    config: RateLimitConfig,
    state: RwLock<HashMap<IpAddr, Vec<Instant>>>,
}

impl IngressRateLimiter {
    /// Creates a limiter with the given settings.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Admits or rejects a request from `source`, recording it if
    /// admitted.
    ///
    /// # Errors
    ///
    /// [`WebhookError::RateLimitExceeded`] when the source exhausted its
    /// window, or when the source cap is reached and pruning could not
    /// make room.
    pub fn check(&self, source: IpAddr) -> Result<(), WebhookError> {
        let now = Instant::now();
        let cutoff = now
            .checked_sub(Duration::from_secs(self.config.window_secs))
            .unwrap_or(now);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if !state.contains_key(&source) && state.len() >= self.config.max_tracked_sources {
            state.retain(|_, stamps| {
                stamps.retain(|stamp| *stamp > cutoff);
                !stamps.is_empty()
            });
            if state.len() >= self.config.max_tracked_sources {
                tracing::warn!(
                    %source,
                    tracked = state.len(),
                    cap = self.config.max_tracked_sources,
                    "rejecting new webhook source: tracking cap reached"
                );
                return Err(WebhookError::RateLimitExceeded);
            }
        }

        let stamps = state.entry(source).or_default();
        stamps.retain(|stamp| *stamp > cutoff);
        if stamps.len() >= self.config.max_requests as usize {
            tracing::warn!(
                %source,
                requests = stamps.len(),
                max = self.config.max_requests,
                "webhook source rate limited"
            );
            return Err(WebhookError::RateLimitExceeded);
        }
        stamps.push(now);
        Ok(())
    }

    /// Number of sources currently tracked.
    #[must_use]
    pub fn tracked_sources(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::thread;

    use super::*;

    fn source(octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))
    }

    fn limiter(max_requests: u32, window_secs: u64, cap: usize) -> IngressRateLimiter {
        IngressRateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs,
            max_tracked_sources: cap,
        })
    }

    #[test]
    fn admits_within_the_window() {
        let limiter = limiter(5, 60, 16);
        for _ in 0..5 {
            assert!(limiter.check(source(1)).is_ok());
        }
    }

    #[test]
    fn rejects_once_the_window_is_full() {
        let limiter = limiter(3, 60, 16);
        for _ in 0..3 {
            limiter.check(source(1)).unwrap();
        }
        assert_eq!(
            limiter.check(source(1)),
            Err(WebhookError::RateLimitExceeded)
        );
    }

    #[test]
    fn sources_are_tracked_independently() {
        let limiter = limiter(2, 60, 16);
        limiter.check(source(1)).unwrap();
        limiter.check(source(1)).unwrap();
        assert!(limiter.check(source(1)).is_err());

        // A different source still has its own budget.
        assert!(limiter.check(source(2)).is_ok());
    }

    #[test]
    fn window_expiry_readmits() {
        let limiter = limiter(1, 1, 16);
        limiter.check(source(1)).unwrap();
        assert!(limiter.check(source(1)).is_err());

        thread::sleep(Duration::from_millis(1_100));
        assert!(limiter.check(source(1)).is_ok());
    }

    #[test]
    fn source_cap_rejects_new_sources_when_full() {
        let limiter = limiter(10, 60, 3);
        for octet in 1..=3 {
            limiter.check(source(octet)).unwrap();
        }
        assert_eq!(limiter.tracked_sources(), 3);

        // New source, cap reached, nothing expired: rejected.
        assert!(limiter.check(source(4)).is_err());
        assert!(limiter.tracked_sources() <= 3);

        // Known sources keep working.
        assert!(limiter.check(source(1)).is_ok());
    }

    #[test]
    fn source_cap_prune_reclaims_expired_entries() {
        let limiter = limiter(10, 1, 2);
        limiter.check(source(1)).unwrap();
        limiter.check(source(2)).unwrap();

        thread::sleep(Duration::from_millis(1_100));

        // Cap is reached but everything is expired; the prune makes room.
        assert!(limiter.check(source(3)).is_ok());
        assert!(limiter.tracked_sources() <= 2);
    }
}
