//! Invariant checking helpers

use crate::error::Result;
use crate::ledger::PositionLedger;
use crate::oracle::PriceFeed;
use crate::protocol::Protocol;
use crate::sorted::OrderedIndex;

/// Every unit of collateral that entered is still held or was paid out
///
/// active + pending + pool + surplus + fees + pool gains paid
///   == deposited - withdrawn
pub fn collateral_conserved<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> bool {
    let c = p.custody();
    let pool = p.pool().state();
    let held = [
        c.active_collateral,
        c.default_collateral,
        pool.collateral_balance,
        c.surplus_collateral,
        c.liquidation_fees_paid,
        pool.collateral_paid,
    ]
    .iter()
    .try_fold(0u128, |acc, v| acc.checked_add(*v));

    held == c.collateral_deposited.checked_sub(c.collateral_withdrawn)
}

/// Debt is either still owed by positions or was cancelled by the pool
pub fn debt_conserved<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> bool {
    let c = p.custody();
    let owed = c
        .active_debt
        .checked_add(c.default_debt)
        .and_then(|v| v.checked_add(p.pool().state().debt_absorbed));
    owed == c.debt_issued.checked_sub(c.debt_repaid)
}

/// Sum of each active position's entire collateral and debt
pub fn sum_entire<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> Result<(u128, u128)> {
    let mut collateral = 0u128;
    let mut debt = 0u128;
    for id in p.ledger().ids() {
        if !p.position(id).is_active() {
            continue;
        }
        let entire = p.entire_position(id)?;
        collateral = collateral.saturating_add(entire.collateral);
        debt = debt.saturating_add(entire.debt);
    }
    Ok((collateral, debt))
}

/// Truncation dust: how far custody runs ahead of what positions can claim
///
/// Returns `None` if positions could claim more than custody holds.
pub fn rounding_gap<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(
    p: &Protocol<F, L, I>,
) -> Result<Option<(u128, u128)>> {
    let (collateral, debt) = sum_entire(p)?;
    let c = p.custody();
    Ok(c
        .entire_collateral()
        .checked_sub(collateral)
        .zip(c.entire_debt().checked_sub(debt)))
}

pub fn total_stakes_consistent<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> bool {
    let sum = p
        .ledger()
        .ids()
        .into_iter()
        .map(|id| p.position(id))
        .filter(|pos| pos.is_active())
        .fold(0u128, |acc, pos| acc.saturating_add(pos.stake));
    sum == p.rewards().total_stakes
}

/// Exactly the active positions are indexed
pub fn index_matches_ledger<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> bool {
    let mut active = 0usize;
    for id in p.ledger().ids() {
        let is_active = p.position(id).is_active();
        if is_active != p.index().contains(id) {
            return false;
        }
        if is_active {
            active += 1;
        }
    }
    active == p.index().count()
}

/// How far depositor claims exceed what the pool holds, as
/// `(deposits, collateral gains)`; zero when solvent
pub fn pool_shortfall<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(
    p: &Protocol<F, L, I>,
) -> Result<(u128, u128)> {
    let pool = p.pool();
    let mut deposits = 0u128;
    let mut gains = 0u128;
    for d in pool.depositors() {
        deposits = deposits.saturating_add(pool.compounded_deposit(d)?);
        gains = gains.saturating_add(pool.pending_collateral_gain(d)?);
    }
    Ok((
        deposits.saturating_sub(pool.total_deposits()),
        gains.saturating_sub(pool.state().collateral_balance),
    ))
}

/// Depositors can never claim more than the pool holds
pub fn pool_solvent<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> Result<bool> {
    Ok(pool_shortfall(p)? == (0, 0))
}

/// All of the above
pub fn invariants_hold<F: PriceFeed, L: PositionLedger, I: OrderedIndex>(p: &Protocol<F, L, I>) -> Result<bool> {
    Ok(collateral_conserved(p)
        && debt_conserved(p)
        && rounding_gap(p)?.is_some()
        && total_stakes_consistent(p)
        && index_matches_ledger(p)
        && pool_solvent(p)?)
}
