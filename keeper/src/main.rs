//! Trove Liquidation Keeper
//!
//! Replays a price path against an in-process protocol, keeps a health queue
//! of open positions and triggers batch liquidations once any of them falls
//! below the liquidation threshold.

mod config;
mod health;
mod priority_queue;
mod scenario;

use anyhow::{Context, Result};
use config::Config;
use health::{display_ratio, display_units};
use priority_queue::HealthQueue;
use scenario::{KeeperProtocol, Scenario};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use trove_model::{CdpError, SystemMode};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Trove Liquidation Keeper");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({:#}), using default local config", e);
        let path = Config::path();
        if !Path::new(&path).exists() {
            if let Err(e) = Config::write_default(&path) {
                log::warn!("Could not write default config: {:#}", e);
            }
        }
        Config::default_local()
    });

    let params = config.params.to_params()?;
    let scenario = Scenario::load(&config.scenario_path)?;
    let protocol = Arc::new(Mutex::new(
        scenario.build(params).context("Failed to build protocol from scenario")?,
    ));

    log::info!("Replaying scenario: {}", config.scenario_path);

    let reporter = tokio::spawn(report_loop(
        Arc::clone(&protocol),
        Duration::from_millis(config.report_interval_ms),
    ));

    let mut queue = HealthQueue::new();
    let mut interval = time::interval(Duration::from_millis(config.poll_interval_ms));

    loop {
        interval.tick().await;

        let mut guard = protocol.lock().await;
        if let Err(e) = process_tick(&mut queue, &mut guard, &config) {
            log::error!("Error processing liquidations: {:#}", e);
        }

        if !guard.feed_mut().advance() {
            log::info!("Price path exhausted");
            break;
        }
    }

    reporter.abort();
    report(&*protocol.lock().await);
    Ok(())
}

/// Refresh the health queue at the current price and liquidate if needed
fn process_tick(queue: &mut HealthQueue, protocol: &mut KeeperProtocol, config: &Config) -> Result<()> {
    let tick = protocol.feed_mut().tick();
    let price = protocol.fetch_price();
    let mode = protocol.system_mode(price);
    let prices_left = protocol.feed_mut().remaining();

    queue.refresh(health::scan(protocol, price, tick)?);

    log::info!(
        "Tick {}: price {} TCR {} ({:?}, {} open, {} prices left)",
        tick,
        display_units(price),
        display_ratio(protocol.tcr(price)),
        mode,
        queue.len(),
        prices_left
    );
    if queue.is_empty() {
        return Ok(());
    }

    let params = protocol.params();
    let threshold = match mode {
        SystemMode::Normal => params.minimum_ratio,
        SystemMode::Defensive => params.defensive_ratio,
    };

    for at_risk in queue.get_at_risk(params.minimum_ratio, config.warning_buffer()) {
        log::warn!("Position {} at risk: ICR {}", at_risk.id, display_ratio(at_risk.icr));
    }

    let liquidatable = queue.get_liquidatable(threshold);
    if liquidatable.is_empty() {
        log::debug!("No positions need liquidation");
        return Ok(());
    }

    log::info!("Found {} positions below {}", liquidatable.len(), display_ratio(threshold));
    if let Some(worst) = queue.peek() {
        log::debug!("Worst ICR: {} ({})", display_ratio(worst.icr), worst.id);
    }

    match protocol.liquidate_batch(config.max_liquidations_per_batch) {
        Ok(outcome) => {
            for l in &outcome.liquidated {
                log::info!(
                    "Liquidated {} ({:?}, ICR {}): debt {} offset {} redistributed {}",
                    l.id,
                    l.kind,
                    display_ratio(l.icr),
                    display_units(l.debt),
                    display_units(l.split.debt_offset),
                    display_units(l.split.debt_redistributed),
                );
                queue.remove(&l.id);
            }
            let (fee, reserve) = outcome.compensation();
            log::info!(
                "Batch complete: {} liquidated, compensation {} collateral + {} stable",
                outcome.count(),
                display_units(fee),
                display_units(reserve)
            );
            if outcome.pool.epoch_advanced {
                log::warn!("Stability pool emptied; deposits rolled to a new epoch");
            }
        }
        // Queue thresholds are conservative; the core has the final say
        Err(CdpError::NothingToLiquidate) => log::debug!("Core found nothing to liquidate"),
        Err(CdpError::LastPositionProtected(id)) => match queue.get(&id) {
            Some(h) => log::warn!("Position {} is the last one open (ICR {}); not liquidating", id, display_ratio(h.icr)),
            None => log::warn!("Position {} is the last one open; not liquidating", id),
        },
        Err(e) => return Err(e).context("Batch liquidation failed"),
    }

    Ok(())
}

/// Periodically log protocol totals
async fn report_loop(protocol: Arc<Mutex<KeeperProtocol>>, every: Duration) {
    let mut interval = time::interval(every);
    loop {
        interval.tick().await;
        report(&*protocol.lock().await);
    }
}

fn report(protocol: &KeeperProtocol) {
    let custody = protocol.custody();
    let pool = protocol.pool();
    log::info!(
        "Status: {} open, collateral {} (pending {}), debt {} (pending {}), pool {} / collateral {}, surplus {}",
        protocol.active_count(),
        display_units(custody.active_collateral),
        display_units(custody.default_collateral),
        display_units(custody.active_debt),
        display_units(custody.default_debt),
        display_units(pool.total_deposits()),
        display_units(pool.state().collateral_balance),
        display_units(custody.surplus_collateral),
    );
    for depositor in pool.depositors() {
        match (pool.compounded_deposit(depositor), pool.pending_collateral_gain(depositor)) {
            (Ok(deposit), Ok(gain)) => log::debug!(
                "Depositor {}: deposit {} gain {}",
                depositor,
                display_units(deposit),
                display_units(gain)
            ),
            (Err(e), _) | (_, Err(e)) => log::error!("Depositor {} unreadable: {}", depositor, e),
        }
    }
}
