//! smsact-daemon — webhook server and reconciliation worker.
//!
//! Runs the two channels side by side: an axum server receives marketplace
//! webhooks on `/webhook`, and a poll loop reconciles every non-terminal
//! activation against the remote API on a fixed interval. Both feed the
//! same engine through the same per-activation locks, so whichever channel
//! observes a change first wins and the other absorbs it.
//!
//! The process runs in the foreground and exits cleanly on SIGINT/SIGTERM;
//! supervision (restarts, daemonization) belongs to the init system.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use smsact_core::config::Config;
use smsact_core::gateway::{ActivationGateway, HttpActivationGateway};
use smsact_core::poll::ReconciliationWorker;
use smsact_core::repository::{
    ActivationRepository, InMemoryActivationRepository, SqliteActivationRepository,
};
use smsact_daemon::state::{DaemonState, SharedState};
use smsact_daemon::{handlers, unix_now};

/// smsact daemon — activation lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "smsact-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "smsact.toml")]
    config: PathBuf,

    /// Override the webhook bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the poll interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        config.daemon.bind_addr = bind;
    }
    if let Some(db) = args.db {
        config.daemon.db_path = Some(db);
    }
    if let Some(interval) = args.poll_interval {
        config.poll.interval_secs = interval;
    }
    config.validate().context("configuration rejected")?;

    let repository: Arc<dyn ActivationRepository> = match &config.daemon.db_path {
        Some(path) => {
            info!(path = %path.display(), "opening activation database");
            Arc::new(
                SqliteActivationRepository::open(path)
                    .context("opening activation database")?,
            )
        }
        None => {
            warn!("no db_path configured; activations will not survive a restart");
            Arc::new(InMemoryActivationRepository::new())
        }
    };

    let api_key = config.api_key().context("resolving marketplace api key")?;
    let gateway: Arc<dyn ActivationGateway> = Arc::new(
        HttpActivationGateway::with_timeout(
            config.marketplace.base_url.as_str(),
            api_key,
            Duration::from_secs(config.marketplace.timeout_secs),
        )
        .context("building marketplace gateway")?,
    );

    let state: SharedState = Arc::new(DaemonState::new(
        Arc::clone(&repository),
        Arc::clone(&gateway),
        config.daemon.rate_limit.clone(),
    ));
    let worker = Arc::new(ReconciliationWorker::new(
        repository,
        gateway,
        Arc::clone(&state.locks),
        config.poll,
    ));

    let poll_task = tokio::spawn(run_poll_loop(
        worker,
        Duration::from_secs(config.poll.interval_secs),
    ));

    let app = Router::new()
        .route("/webhook", post(handlers::webhook))
        .route("/healthz", get(handlers::healthz))
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = config
        .daemon
        .bind_addr
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, poll_interval_secs = config.poll.interval_secs, "smsact-daemon listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving webhook endpoint")?;

    poll_task.abort();
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

/// Drives the pull channel: one sync pass per tick, run off the async
/// executor because the worker does blocking I/O.
async fn run_poll_loop(worker: Arc<ReconciliationWorker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let worker = Arc::clone(&worker);
        let now = unix_now();
        match tokio::task::spawn_blocking(move || worker.sync_pass(now)).await {
            Ok(Ok(stats)) => {
                if stats.failures > 0 {
                    warn!(
                        processed = stats.processed,
                        changed = stats.changed,
                        failures = stats.failures,
                        "sync pass finished with failures"
                    );
                } else {
                    debug!(
                        processed = stats.processed,
                        changed = stats.changed,
                        "sync pass finished"
                    );
                }
            }
            Ok(Err(storage_error)) => {
                error!(%storage_error, "sync pass could not read the active set");
            }
            Err(join_error) => {
                error!(%join_error, "sync pass task failed");
            }
        }
    }
}

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            error!(%error, "failed to install SIGTERM handler; relying on ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "ctrl-c handler failed");
            }
        }
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received");
}
