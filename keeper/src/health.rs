//! Health calculation for positions

use anyhow::{Context, Result};
use trove_model::math::{collateral_ratio, DECIMAL_PRECISION};
use trove_model::{OrderedIndex, PositionId, PositionLedger, PriceFeed, Protocol};

/// Position health snapshot at one price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionHealth {
    pub id: PositionId,
    /// Individual collateral ratio, pending redistribution included (1e18 = 100%)
    pub icr: u128,
    pub collateral: u128,
    pub debt: u128,
    /// Tick the snapshot was taken at
    pub last_update: u64,
}

impl PositionHealth {
    /// Check if position is below the liquidation threshold
    pub fn needs_liquidation(&self, threshold: u128) -> bool {
        self.icr < threshold
    }

    /// Check if position is above the threshold but within `buffer` of it
    pub fn in_warning_zone(&self, threshold: u128, buffer: u128) -> bool {
        self.icr >= threshold && self.icr < threshold.saturating_add(buffer)
    }
}

/// Calculate health of one active position
pub fn calculate_health<F, L, I>(
    protocol: &Protocol<F, L, I>,
    id: PositionId,
    price: u128,
    tick: u64,
) -> Result<PositionHealth>
where
    F: PriceFeed,
    L: PositionLedger,
    I: OrderedIndex,
{
    let entire = protocol
        .entire_position(id)
        .context(format!("Failed to read position {}", id))?;

    Ok(PositionHealth {
        id,
        icr: collateral_ratio(entire.collateral, entire.debt, price),
        collateral: entire.collateral,
        debt: entire.debt,
        last_update: tick,
    })
}

/// Health of every active position
pub fn scan<F, L, I>(protocol: &Protocol<F, L, I>, price: u128, tick: u64) -> Result<Vec<PositionHealth>>
where
    F: PriceFeed,
    L: PositionLedger,
    I: OrderedIndex,
{
    protocol
        .ledger()
        .ids()
        .into_iter()
        .filter(|id| protocol.position(*id).is_active())
        .map(|id| calculate_health(protocol, id, price, tick))
        .collect()
}

/// Render a 1e18-scaled amount with four decimals
pub fn display_units(amount: u128) -> String {
    let whole = amount / DECIMAL_PRECISION;
    let frac = amount % DECIMAL_PRECISION / 100_000_000_000_000;
    format!("{}.{:04}", whole, frac)
}

/// Render a 1e18-scaled ratio as a percentage
pub fn display_ratio(ratio: u128) -> String {
    if ratio == u128::MAX {
        return "inf".to_string();
    }
    format!("{}%", display_units(ratio.saturating_mul(100)))
}
