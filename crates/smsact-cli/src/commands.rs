//! CLI command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use smsact_core::activation::Activation;
use smsact_core::config::Config;
use smsact_core::gateway::{ActivationGateway, HttpActivationGateway};
use smsact_core::poll::ReconciliationWorker;
use smsact_core::pricing::{PricePolicy, SelectorOptions, rank};
use smsact_core::reconcile::{ChannelEvent, Disposition, IdLockMap, reconcile};
use smsact_core::repository::{
    ActivationRepository, InMemoryActivationRepository, SqliteActivationRepository,
};
use smsact_core::workflow::{
    ExecutionMode, PurchaseOutcome, PurchaseRequest, offers_from_availability, run_purchase,
};

/// Opens the repository the config names. Without a `db_path` the CLI
/// still works, but only remote state is visible across invocations.
pub fn open_repository(config: &Config) -> Result<Arc<dyn ActivationRepository>> {
    match &config.daemon.db_path {
        Some(path) => Ok(Arc::new(
            SqliteActivationRepository::open(path)
                .with_context(|| format!("opening {}", path.display()))?,
        )),
        None => {
            tracing::warn!("no db_path configured; local records are per-invocation only");
            Ok(Arc::new(InMemoryActivationRepository::new()))
        }
    }
}

/// Builds the HTTP gateway from the config.
pub fn open_gateway(config: &Config) -> Result<Arc<dyn ActivationGateway>> {
    let api_key = config.api_key().context("resolving marketplace api key")?;
    Ok(Arc::new(
        HttpActivationGateway::with_timeout(
            config.marketplace.base_url.as_str(),
            api_key,
            Duration::from_secs(config.marketplace.timeout_secs),
        )
        .context("building marketplace gateway")?,
    ))
}

#[allow(clippy::too_many_arguments)]
pub fn buy(
    config: &Config,
    repository: &dyn ActivationRepository,
    gateway: &dyn ActivationGateway,
    service: &str,
    policy: Option<&str>,
    max_price: Option<f64>,
    live: bool,
    order_id: Option<String>,
) -> Result<()> {
    let policy = resolve_policy(config, policy)?;
    let Some(max_price) = max_price.or(config.purchase.max_price) else {
        bail!("no budget: pass --max-price or set purchase.max_price in the config");
    };

    let request = PurchaseRequest {
        service_id: service.to_string(),
        policy,
        max_price,
        quality_weight: config.purchase.quality_weight,
        price_weight: config.purchase.price_weight,
        mode: if live {
            ExecutionMode::Live
        } else {
            ExecutionMode::DryRun
        },
        order_id,
    };

    match run_purchase(&request, gateway)? {
        PurchaseOutcome::Purchased { activation } => {
            repository
                .save(&activation)
                .context("persisting the new activation")?;
            println!("purchased activation {}", activation.id);
            print_activation(&activation);
            Ok(())
        }
        PurchaseOutcome::Halted { reason } => {
            println!("{reason}");
            Ok(())
        }
    }
}

pub fn status(
    repository: &dyn ActivationRepository,
    gateway: &dyn ActivationGateway,
    id: &str,
) -> Result<()> {
    // The argument may be either the remote activation id or the order id
    // we correlated the purchase with.
    if let Some(activation) = repository.find_by_id(id)? {
        print_activation(&activation);
        return Ok(());
    }
    if let Some(activation) = repository.find_by_external_id(id)? {
        print_activation(&activation);
        return Ok(());
    }

    println!("{id}: not tracked locally; fetching remote snapshot");
    let snapshot = gateway.get_activation(id)?;
    let activation = snapshot.to_activation()?;
    print_activation(&activation);
    Ok(())
}

pub fn cancel(
    repository: &dyn ActivationRepository,
    gateway: &dyn ActivationGateway,
    id: &str,
) -> Result<()> {
    gateway.cancel_activation(id).context("remote cancel")?;
    apply_manual_transition(repository, id, "canceled")
}

pub fn finalize(
    repository: &dyn ActivationRepository,
    gateway: &dyn ActivationGateway,
    id: &str,
) -> Result<()> {
    gateway.finalize_activation(id).context("remote finalize")?;
    apply_manual_transition(repository, id, "finalized")
}

pub fn sync(
    config: &Config,
    repository: Arc<dyn ActivationRepository>,
    gateway: Arc<dyn ActivationGateway>,
) -> Result<()> {
    let worker =
        ReconciliationWorker::new(repository, gateway, Arc::new(IdLockMap::new()), config.poll);
    let stats = worker.sync_pass(unix_now())?;
    println!(
        "sync pass: {} processed, {} changed, {} failures",
        stats.processed, stats.changed, stats.failures
    );
    Ok(())
}

pub fn offers(
    config: &Config,
    gateway: &dyn ActivationGateway,
    service: &str,
    policy: Option<&str>,
    max_price: Option<f64>,
) -> Result<()> {
    let policy = resolve_policy(config, policy)?;
    let Some(max_price) = max_price.or(config.purchase.max_price) else {
        bail!("no budget: pass --max-price or set purchase.max_price in the config");
    };

    let availability = gateway.get_prices(service)?;
    if availability.is_empty() {
        bail!("no availability for service {service}");
    }
    let offers = offers_from_availability(&availability);
    let ranked = rank(
        &offers,
        &SelectorOptions {
            policy,
            max_price,
            quality_weight: config.purchase.quality_weight,
            price_weight: config.purchase.price_weight,
        },
    )?;

    println!("offers for {service} (policy {policy}, ceiling {max_price:.4}):");
    for (position, offer) in ranked.iter().enumerate() {
        println!(
            "{:>3}. {:<8} price {:.4}  quality {:.2}",
            position + 1,
            offer.id,
            offer.price.unwrap_or(0.0),
            offer.quality.unwrap_or(0.0),
        );
    }
    Ok(())
}

pub fn balance(gateway: &dyn ActivationGateway) -> Result<()> {
    let balance = gateway.get_balance()?;
    println!(
        "balance: {:.4} total, {:.4} reserved, {:.4} available",
        balance.total,
        balance.reserved,
        balance.total - balance.reserved
    );
    Ok(())
}

/// Applies a manual terminal transition through the same reconciliation
/// authority the daemon channels use.
fn apply_manual_transition(
    repository: &dyn ActivationRepository,
    id: &str,
    status: &str,
) -> Result<()> {
    let Some(current) = repository.find_by_id(id)? else {
        println!("{id}: remote operation done (not tracked locally)");
        return Ok(());
    };

    let event = ChannelEvent {
        activation_id: id.to_string(),
        status: status.to_string(),
        sms_status: None,
        sms_code: None,
        sms_text: None,
    };
    let now = unix_now();
    match reconcile(&current, &event, now)? {
        Disposition::Apply(update) => {
            let updated = update.apply_to(&current, now);
            repository.save(&updated)?;
            println!("{id}: {} -> {}", current.state, updated.state);
        }
        Disposition::Halt(reason) => {
            println!("{id}: no local change ({reason})");
        }
    }
    Ok(())
}

fn resolve_policy(config: &Config, flag: Option<&str>) -> Result<PricePolicy> {
    match flag {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("parsing policy {raw:?}")),
        None => Ok(config.purchase.policy),
    }
}

fn print_activation(activation: &Activation) {
    println!("  id:          {}", activation.id);
    if let Some(external_id) = &activation.external_id {
        println!("  order id:    {external_id}");
    }
    println!("  phone:       {}", activation.phone);
    println!(
        "  service:     {} ({})",
        activation.service_id, activation.country_id
    );
    println!(
        "  state:       {} / sms {}",
        activation.state, activation.sms_status
    );
    println!(
        "  price:       {:.4} (ceiling {:.4})",
        activation.price, activation.max_price
    );
    if let Some(code) = &activation.sms_code {
        println!("  sms code:    {code}");
    }
    if let Some(text) = &activation.sms_text {
        println!("  sms text:    {text}");
    }
    println!(
        "  created/updated/expires: {} / {} / {}",
        activation.created_at, activation.updated_at, activation.expires_at
    );
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
