//! Configuration parsing and validation.
//!
//! Settings live in a TOML file with one section per concern. Everything
//! except the marketplace endpoint has a sensible default; validation is
//! fail-closed and runs at parse time so a misconfigured process refuses
//! to start instead of limping.
//!
//! The API key is deliberately not part of the file: the file names an
//! environment variable and [`Config::api_key`] resolves it at startup
//! into a [`SecretString`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::PricePolicy;
use crate::webhook::RateLimitConfig;

/// Top-level configuration aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings (webhook server, storage).
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Marketplace endpoint and credentials.
    pub marketplace: MarketplaceConfig,

    /// Poll (reconciliation) worker settings.
    #[serde(default)]
    pub poll: PollConfig,

    /// Purchase defaults used by the CLI.
    #[serde(default)]
    pub purchase: PurchaseConfig,
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for invalid TOML or missing required
    /// sections, [`ConfigError::Validation`] for values that parse but
    /// cannot work.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the aggregate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marketplace.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "marketplace.base_url must not be empty".to_string(),
            ));
        }
        if self.marketplace.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "marketplace.timeout_secs must be positive".to_string(),
            ));
        }
        if self.daemon.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "daemon.bind_addr {:?} is not a socket address",
                self.daemon.bind_addr
            )));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll.interval_secs must be positive".to_string(),
            ));
        }
        if let Some(max_price) = self.purchase.max_price {
            if max_price <= 0.0 {
                return Err(ConfigError::Validation(
                    "purchase.max_price must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolves the marketplace API key from the configured environment
    /// variable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] when the variable is unset or empty.
    pub fn api_key(&self) -> Result<SecretString, ConfigError> {
        let name = &self.marketplace.api_key_env;
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
            _ => Err(ConfigError::Validation(format!(
                "environment variable {name} is not set"
            ))),
        }
    }
}

/// Daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the webhook server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite database path. `None` keeps records in memory only.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Webhook ingress rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/// Marketplace endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// API base URL.
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "SMSACT_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Poll (reconciliation) worker settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollConfig {
    /// Seconds between poll passes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Active-set size above which pacing kicks in.
    #[serde(default = "default_pacing_threshold")]
    pub pacing_threshold: usize,

    /// Delay between remote reads while pacing, in milliseconds.
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            pacing_threshold: default_pacing_threshold(),
            pacing_delay_ms: default_pacing_delay_ms(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_pacing_threshold() -> usize {
    5
}

fn default_pacing_delay_ms() -> u64 {
    500
}

/// Purchase defaults used when CLI flags are absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PurchaseConfig {
    /// Default ranking policy.
    #[serde(default)]
    pub policy: PricePolicy,

    /// Default budget ceiling.
    #[serde(default)]
    pub max_price: Option<f64>,

    /// Quality weight for the balanced policy.
    #[serde(default)]
    pub quality_weight: Option<f64>,

    /// Price weight for the balanced policy.
    #[serde(default)]
    pub price_weight: Option<f64>,
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but cannot work.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
