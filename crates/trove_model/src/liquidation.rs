//! Liquidation orchestrator
//!
//! One price is fetched per call. Candidates are assessed against the running
//! system totals (the staged custody), so a batch behaves like the same
//! liquidations applied one after another:
//!
//! - redistribution is applied to the staged accumulator per position, so a
//!   later candidate already carries its share of an earlier one;
//! - the pool offset is aggregated and applied once when the batch commits,
//!   bounded by the deposits available when the batch started.
//!
//! Nothing is written unless the whole call succeeds.

use arrayvec::ArrayVec;

use crate::changeset::Changeset;
use crate::error::{CdpError, OrOverflow, Result};
use crate::ledger::PositionLedger;
use crate::math::{bps_of, collateral_ratio, min_u128, mul_div, DECIMAL_PRECISION};
use crate::mode::SystemMode;
use crate::oracle::PriceFeed;
use crate::protocol::{entire_of, EntirePosition, Protocol};
use crate::sorted::OrderedIndex;
use crate::stability_pool::OffsetReport;
use crate::state::{Params, Position, PositionId, PositionStatus};

/// Most positions a single call will close
pub const MAX_BATCH_LIQUIDATIONS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiquidationKind {
    /// Offset against the pool as far as it reaches, rest redistributed
    Standard,
    /// Ratio at or below 100% in defensive mode: nothing goes to the pool
    Redistribution,
    /// Defensive-mode offset capped at the minimum ratio; excess kept as surplus
    Capped,
}

/// Where one liquidated position's collateral and debt go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Split {
    pub collateral_fee: u128,
    pub debt_offset: u128,
    pub collateral_to_pool: u128,
    pub debt_redistributed: u128,
    pub collateral_redistributed: u128,
    pub surplus: u128,
}

/// Offset as much debt as the pool can take; redistribute the rest
///
/// Collateral follows the debt pro rata after the fee is carved out.
pub fn split_offset(collateral: u128, debt: u128, pool_available: u128, fee_bps: u16) -> Result<Split> {
    let fee = bps_of(collateral, fee_bps);
    let net = collateral - fee;
    if pool_available == 0 || debt == 0 {
        return Ok(Split {
            collateral_fee: fee,
            debt_redistributed: debt,
            collateral_redistributed: net,
            ..Split::default()
        });
    }

    let debt_offset = min_u128(debt, pool_available);
    let collateral_to_pool = mul_div(net, debt_offset, debt).or_overflow()?;
    Ok(Split {
        collateral_fee: fee,
        debt_offset,
        collateral_to_pool,
        debt_redistributed: debt - debt_offset,
        collateral_redistributed: net - collateral_to_pool,
        surplus: 0,
    })
}

/// Redistribute everything after the fee
pub fn split_redistribution(collateral: u128, debt: u128, fee_bps: u16) -> Split {
    let fee = bps_of(collateral, fee_bps);
    Split {
        collateral_fee: fee,
        debt_redistributed: debt,
        collateral_redistributed: collateral - fee,
        ..Split::default()
    }
}

/// Offset the whole debt, paying the pool collateral worth `minimum_ratio`
///
/// The fee is taken from the capped amount; what is left of the position's
/// collateral becomes the owner's surplus.
pub fn split_capped(collateral: u128, debt: u128, price: u128, params: &Params) -> Result<Split> {
    let capped = min_u128(mul_div(debt, params.minimum_ratio, price).or_overflow()?, collateral);
    let fee = bps_of(capped, params.liquidation_fee_bps);
    Ok(Split {
        collateral_fee: fee,
        debt_offset: debt,
        collateral_to_pool: capped - fee,
        debt_redistributed: 0,
        collateral_redistributed: 0,
        surplus: collateral - capped,
    })
}

/// Decide whether a position with ratio `icr` is liquidated, and how
///
/// `system_ratio` and `pool_available` are the running values before this
/// position is taken out.
#[allow(clippy::too_many_arguments)]
pub fn assess(
    params: &Params,
    mode: SystemMode,
    icr: u128,
    system_ratio: u128,
    collateral: u128,
    debt: u128,
    price: u128,
    pool_available: u128,
) -> Result<Option<(LiquidationKind, Split)>> {
    let fee_bps = params.liquidation_fee_bps;
    match mode {
        SystemMode::Normal => {
            if icr < params.minimum_ratio {
                Ok(Some((LiquidationKind::Standard, split_offset(collateral, debt, pool_available, fee_bps)?)))
            } else {
                Ok(None)
            }
        }
        SystemMode::Defensive => {
            if icr <= DECIMAL_PRECISION {
                Ok(Some((LiquidationKind::Redistribution, split_redistribution(collateral, debt, fee_bps))))
            } else if icr < params.minimum_ratio {
                Ok(Some((LiquidationKind::Standard, split_offset(collateral, debt, pool_available, fee_bps)?)))
            } else if icr < params.defensive_ratio && icr < system_ratio && debt <= pool_available {
                Ok(Some((LiquidationKind::Capped, split_capped(collateral, debt, price, params)?)))
            } else {
                Ok(None)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LiquidatedPosition {
    pub id: PositionId,
    pub kind: LiquidationKind,
    pub icr: u128,
    /// Entire collateral, pending redistribution included
    pub collateral: u128,
    /// Entire debt, pending redistribution included
    pub debt: u128,
    /// Protection reserve paid to the caller
    pub reserve: u128,
    pub split: Split,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LiquidationTotals {
    pub collateral: u128,
    pub debt: u128,
    pub collateral_fee: u128,
    pub reserve: u128,
    pub debt_offset: u128,
    pub collateral_to_pool: u128,
    pub debt_redistributed: u128,
    pub collateral_redistributed: u128,
    pub surplus: u128,
}

impl LiquidationTotals {
    fn add(&mut self, l: &LiquidatedPosition) -> Result<()> {
        let s = &l.split;
        self.collateral = self.collateral.checked_add(l.collateral).or_overflow()?;
        self.debt = self.debt.checked_add(l.debt).or_overflow()?;
        self.reserve = self.reserve.checked_add(l.reserve).or_overflow()?;
        self.collateral_fee = self.collateral_fee.checked_add(s.collateral_fee).or_overflow()?;
        self.debt_offset = self.debt_offset.checked_add(s.debt_offset).or_overflow()?;
        self.collateral_to_pool = self.collateral_to_pool.checked_add(s.collateral_to_pool).or_overflow()?;
        self.debt_redistributed = self.debt_redistributed.checked_add(s.debt_redistributed).or_overflow()?;
        self.collateral_redistributed =
            self.collateral_redistributed.checked_add(s.collateral_redistributed).or_overflow()?;
        self.surplus = self.surplus.checked_add(s.surplus).or_overflow()?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub price: u128,
    /// Mode when the call started
    pub mode: SystemMode,
    pub liquidated: ArrayVec<LiquidatedPosition, MAX_BATCH_LIQUIDATIONS>,
    pub totals: LiquidationTotals,
    pub pool: OffsetReport,
}

impl LiquidationOutcome {
    pub fn count(&self) -> usize {
        self.liquidated.len()
    }

    /// Compensation owed to the caller as `(collateral, stable units)`
    pub fn compensation(&self) -> (u128, u128) {
        (self.totals.collateral_fee, self.totals.reserve)
    }
}

struct Batch {
    changes: Changeset,
    price: u128,
    mode: SystemMode,
    pool_available: u128,
    active: usize,
    liquidated: ArrayVec<LiquidatedPosition, MAX_BATCH_LIQUIDATIONS>,
    totals: LiquidationTotals,
}

enum Step {
    Liquidated,
    Skipped { icr: u128, mode: SystemMode },
}

struct Candidate {
    pos: Position,
    entire: EntirePosition,
    icr: u128,
    mode: SystemMode,
    verdict: Option<(LiquidationKind, Split)>,
}

impl<F: PriceFeed, L: PositionLedger, I: OrderedIndex> Protocol<F, L, I> {
    /// Liquidate a single position
    pub fn liquidate(&mut self, id: PositionId) -> Result<LiquidationOutcome> {
        let price = self.fetch_price();
        if !self.ledger.read(id).is_active() {
            return Err(CdpError::InvalidTarget(id));
        }
        if self.index.count() <= 1 {
            return Err(CdpError::LastPositionProtected(id));
        }

        let mut batch = self.begin_batch(price);
        match self.step(&mut batch, id)? {
            Step::Liquidated => self.finish_batch(batch),
            Step::Skipped { .. } => Err(CdpError::NotLiquidatable(id)),
        }
    }

    /// Walk from the worst position, examining at most `max_count` candidates
    ///
    /// The walk ends at the first healthy position in normal mode. In
    /// defensive mode it skips positions that only fail the capped-offset
    /// conditions and ends once ratios reach `defensive_ratio`, or reach
    /// `minimum_ratio` with the pool exhausted. The last active position is
    /// never taken; when it is the first qualifying candidate the call fails
    /// with `LastPositionProtected`.
    pub fn liquidate_batch(&mut self, max_count: usize) -> Result<LiquidationOutcome> {
        let price = self.fetch_price();
        let mut batch = self.begin_batch(price);

        let mut next = self.index.worst();
        let mut examined = 0;
        while let Some(id) = next {
            if examined >= max_count || batch.liquidated.is_full() {
                break;
            }
            if batch.active <= 1 {
                self.protect_last(&batch, id)?;
                break;
            }
            examined += 1;
            next = self.index.next_healthier(id);

            if let Step::Skipped { icr, mode } = self.step(&mut batch, id)? {
                let exhausted = icr >= self.params.minimum_ratio && batch.pool_available == 0;
                if !mode.is_defensive() || icr >= self.params.defensive_ratio || exhausted {
                    break;
                }
            }
        }

        if batch.liquidated.is_empty() {
            return Err(CdpError::NothingToLiquidate);
        }
        self.finish_batch(batch)
    }

    /// Liquidate every eligible position in `ids`, in order
    ///
    /// Ids that are closed, unknown, repeated or healthy are skipped.
    pub fn liquidate_list(&mut self, ids: &[PositionId]) -> Result<LiquidationOutcome> {
        let price = self.fetch_price();
        let mut batch = self.begin_batch(price);

        for &id in ids {
            if batch.liquidated.is_full() {
                break;
            }
            if !batch.changes.read(&self.ledger, id).is_active() {
                continue;
            }
            if batch.active <= 1 {
                self.protect_last(&batch, id)?;
                break;
            }
            self.step(&mut batch, id)?;
        }

        if batch.liquidated.is_empty() {
            return Err(CdpError::NothingToLiquidate);
        }
        self.finish_batch(batch)
    }

    fn begin_batch(&self, price: u128) -> Batch {
        Batch {
            changes: self.stage(),
            price,
            mode: self.system_mode(price),
            pool_available: self.pool.total_deposits(),
            active: self.index.count(),
            liquidated: ArrayVec::new(),
            totals: LiquidationTotals::default(),
        }
    }

    /// Assess one position against the running totals without staging anything
    fn candidate(&self, batch: &Batch, id: PositionId) -> Result<Candidate> {
        let pos = batch.changes.read(&self.ledger, id);
        let entire = entire_of(&batch.changes.rewards, &pos)?;
        let price = batch.price;
        let icr = collateral_ratio(entire.collateral, entire.debt, price);

        let custody = &batch.changes.custody;
        let system_ratio = collateral_ratio(custody.entire_collateral(), custody.entire_debt(), price);
        let mode = SystemMode::from_ratio(system_ratio, &self.params);

        let verdict = assess(
            &self.params,
            mode,
            icr,
            system_ratio,
            entire.collateral,
            entire.debt,
            price,
            batch.pool_available,
        )?;
        Ok(Candidate {
            pos,
            entire,
            icr,
            mode,
            verdict,
        })
    }

    /// Reject a qualifying candidate when it is the only active position left
    fn protect_last(&self, batch: &Batch, id: PositionId) -> Result<()> {
        if batch.liquidated.is_empty() && self.candidate(batch, id)?.verdict.is_some() {
            return Err(CdpError::LastPositionProtected(id));
        }
        Ok(())
    }

    /// Assess one active position and stage its liquidation if it qualifies
    fn step(&self, batch: &mut Batch, id: PositionId) -> Result<Step> {
        let Candidate {
            pos,
            entire,
            icr,
            mode,
            verdict,
        } = self.candidate(batch, id)?;
        let Some((kind, split)) = verdict else {
            log::debug!("Position {} not liquidatable (ICR {}, {:?})", id, icr, mode);
            return Ok(Step::Skipped { icr, mode });
        };
        let cs = &mut batch.changes;

        // Settle pending rewards, then take the whole position out of custody
        let reserve = min_u128(self.params.protection_reserve, cs.custody.reserve_pool);
        cs.custody.realize_pending(entire.pending_collateral, entire.pending_debt);
        cs.custody.active_collateral = cs.custody.active_collateral.checked_sub(entire.collateral).or_overflow()?;
        cs.custody.active_debt = cs.custody.active_debt.checked_sub(entire.debt).or_overflow()?;
        cs.custody.reserve_pool -= reserve;
        cs.custody.reserves_paid = cs.custody.reserves_paid.checked_add(reserve).or_overflow()?;
        cs.custody.liquidation_fees_paid =
            cs.custody.liquidation_fees_paid.checked_add(split.collateral_fee).or_overflow()?;
        cs.custody.surplus_collateral = cs.custody.surplus_collateral.checked_add(split.surplus).or_overflow()?;
        cs.add_surplus(id, split.surplus)?;

        // Stake leaves before the remainder is spread over everyone else
        cs.rewards.remove_stake(pos.stake);
        cs.rewards.redistribute(split.debt_redistributed, split.collateral_redistributed)?;
        cs.custody.default_collateral =
            cs.custody.default_collateral.checked_add(split.collateral_redistributed).or_overflow()?;
        cs.custody.default_debt = cs.custody.default_debt.checked_add(split.debt_redistributed).or_overflow()?;

        cs.write(id, Position::closed(PositionStatus::ClosedByLiquidation));
        cs.unindex(id);

        let liquidated = LiquidatedPosition {
            id,
            kind,
            icr,
            collateral: entire.collateral,
            debt: entire.debt,
            reserve,
            split,
        };
        batch.totals.add(&liquidated)?;
        batch.liquidated.try_push(liquidated).map_err(|_| CdpError::Overflow)?;
        batch.pool_available -= split.debt_offset;
        batch.active -= 1;

        log::debug!(
            "Liquidating {} ({:?}, ICR {}): offset {} / redistributed {} debt, fee {}, surplus {}",
            id,
            kind,
            icr,
            split.debt_offset,
            split.debt_redistributed,
            split.collateral_fee,
            split.surplus
        );
        Ok(Step::Liquidated)
    }

    fn finish_batch(&mut self, batch: Batch) -> Result<LiquidationOutcome> {
        let Batch {
            mut changes,
            price,
            mode,
            liquidated,
            totals,
            ..
        } = batch;

        let pool = changes.pool.offset(totals.debt_offset, totals.collateral_to_pool)?;
        let entire_collateral = changes.custody.entire_collateral();
        changes.rewards.rebase_snapshots(entire_collateral);
        self.apply(changes);

        log::info!(
            "Liquidated {} position(s) at price {}: debt {} (offset {}, redistributed {}), collateral {}",
            liquidated.len(),
            price,
            totals.debt,
            totals.debt_offset,
            totals.debt_redistributed,
            totals.collateral
        );

        Ok(LiquidationOutcome {
            price,
            mode,
            liquidated,
            totals,
            pool,
        })
    }
}
