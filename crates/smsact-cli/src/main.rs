//! smsact — operator CLI for the activation lifecycle manager.
//!
//! Manual operations (cancel, finalize) go remote-first and then apply
//! the local transition through the same reconciliation authority the
//! daemon's channels use, so a CLI mutation can never diverge from what a
//! webhook or poll pass would have computed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use smsact_core::config::Config;

mod commands;

/// smsact — SMS activation lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "smsact")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "smsact.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rank offers and purchase an activation
    Buy {
        /// Service to lease a number for
        service: String,

        /// Ranking policy (cheapest, balanced, best_quality)
        #[arg(long)]
        policy: Option<String>,

        /// Budget ceiling
        #[arg(long)]
        max_price: Option<f64>,

        /// Execute the purchase; without this flag the command ranks,
        /// gates, and halts (dry run)
        #[arg(long)]
        live: bool,

        /// Correlation id to send instead of a generated one
        #[arg(long)]
        order_id: Option<String>,
    },

    /// Show one activation (local record, falling back to the remote
    /// snapshot)
    Status {
        /// Activation id
        id: String,
    },

    /// Cancel an activation, remotely and locally
    Cancel {
        /// Activation id
        id: String,
    },

    /// Finalize an activation, remotely and locally
    Finalize {
        /// Activation id
        id: String,
    },

    /// Run one reconciliation pass over all active records
    Sync,

    /// List ranked offers for a service without purchasing
    Offers {
        /// Service to price
        service: String,

        /// Ranking policy (cheapest, balanced, best_quality)
        #[arg(long)]
        policy: Option<String>,

        /// Budget ceiling
        #[arg(long)]
        max_price: Option<f64>,
    },

    /// Show the marketplace account balance
    Balance,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .or_else(|_| EnvFilter::try_new("warn"))
        .context("building log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let repository = commands::open_repository(&config)?;
    let gateway = commands::open_gateway(&config)?;

    match cli.command {
        Commands::Buy {
            service,
            policy,
            max_price,
            live,
            order_id,
        } => commands::buy(
            &config,
            repository.as_ref(),
            gateway.as_ref(),
            &service,
            policy.as_deref(),
            max_price,
            live,
            order_id,
        ),
        Commands::Status { id } => {
            commands::status(repository.as_ref(), gateway.as_ref(), &id)
        }
        Commands::Cancel { id } => {
            commands::cancel(repository.as_ref(), gateway.as_ref(), &id)
        }
        Commands::Finalize { id } => {
            commands::finalize(repository.as_ref(), gateway.as_ref(), &id)
        }
        Commands::Sync => commands::sync(&config, repository, gateway),
        Commands::Offers {
            service,
            policy,
            max_price,
        } => commands::offers(
            &config,
            gateway.as_ref(),
            &service,
            policy.as_deref(),
            max_price,
        ),
        Commands::Balance => commands::balance(gateway.as_ref()),
    }
}
