//! Redistribution accumulator
//!
//! Uncovered liquidation debt and collateral are spread over every open
//! position in O(1) by bumping two global per-unit-staked sums. A position
//! realizes its share on its next touch:
//!
//! ```text
//! pending = (L_now - L_snapshot) * stake / 1e18
//! ```
//!
//! Rounding always truncates towards the protocol; the truncated remainder of
//! each redistribution is carried into the next one.

use crate::error::{CdpError, OrOverflow, Result};
use crate::math::{mul_div, per_unit_with_carry, DECIMAL_PRECISION};
use crate::state::{Position, RewardSnapshot};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RewardAccumulator {
    /// L_coll: collateral reward per unit staked (1e18 scale, non-decreasing)
    pub collateral_per_unit_staked: u128,
    /// L_debt: debt reward per unit staked (1e18 scale, non-decreasing)
    pub debt_per_unit_staked: u128,
    last_collateral_error: u128,
    last_debt_error: u128,

    /// Sum of stakes of all active positions
    pub total_stakes: u128,
    /// `total_stakes` right after the last liquidation
    pub total_stakes_snapshot: u128,
    /// System collateral right after the last liquidation
    pub total_collateral_snapshot: u128,
}

impl RewardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            collateral: self.collateral_per_unit_staked,
            debt: self.debt_per_unit_staked,
        }
    }

    /// Collateral owed to `pos` but not yet realized; zero unless active
    pub fn pending_collateral(&self, pos: &Position) -> Result<u128> {
        if !pos.is_active() {
            return Ok(0);
        }
        let delta = self.collateral_per_unit_staked.saturating_sub(pos.snapshot.collateral);
        mul_div(pos.stake, delta, DECIMAL_PRECISION).or_overflow()
    }

    /// Debt owed by `pos` but not yet realized; zero unless active
    pub fn pending_debt(&self, pos: &Position) -> Result<u128> {
        if !pos.is_active() {
            return Ok(0);
        }
        let delta = self.debt_per_unit_staked.saturating_sub(pos.snapshot.debt);
        mul_div(pos.stake, delta, DECIMAL_PRECISION).or_overflow()
    }

    pub fn has_pending(&self, pos: &Position) -> bool {
        pos.is_active() && pos.snapshot.collateral < self.collateral_per_unit_staked
    }

    /// Stake for `collateral`, normalized by the post-liquidation snapshot ratio
    ///
    /// Before the first liquidation the stake equals the collateral.
    pub fn compute_stake(&self, collateral: u128) -> Result<u128> {
        if self.total_collateral_snapshot == 0 {
            return Ok(collateral);
        }
        mul_div(collateral, self.total_stakes_snapshot, self.total_collateral_snapshot).or_overflow()
    }

    /// Replace a position's stake in the running total
    pub fn update_stake(&mut self, old: u128, new: u128) -> Result<()> {
        self.total_stakes = self
            .total_stakes
            .checked_sub(old)
            .and_then(|t| t.checked_add(new))
            .or_overflow()?;
        Ok(())
    }

    pub fn remove_stake(&mut self, stake: u128) {
        self.total_stakes = self.total_stakes.saturating_sub(stake);
    }

    /// Spread `debt` and `collateral` over all remaining stake
    ///
    /// The liquidated positions' stakes must already be removed.
    pub fn redistribute(&mut self, debt: u128, collateral: u128) -> Result<()> {
        if debt == 0 && collateral == 0 {
            return Ok(());
        }
        if self.total_stakes == 0 {
            return Err(CdpError::InvalidParams("no remaining stake to redistribute to"));
        }

        let (coll_per_unit, coll_error) =
            per_unit_with_carry(collateral, self.total_stakes, self.last_collateral_error).or_overflow()?;
        let (debt_per_unit, debt_error) =
            per_unit_with_carry(debt, self.total_stakes, self.last_debt_error).or_overflow()?;

        self.collateral_per_unit_staked = self.collateral_per_unit_staked.checked_add(coll_per_unit).or_overflow()?;
        self.debt_per_unit_staked = self.debt_per_unit_staked.checked_add(debt_per_unit).or_overflow()?;
        self.last_collateral_error = coll_error;
        self.last_debt_error = debt_error;

        log::debug!(
            "Redistributed debt {} collateral {} over stake {}",
            debt,
            collateral,
            self.total_stakes
        );
        Ok(())
    }

    /// Rebase the stake ratio after a liquidation batch
    ///
    /// `entire_collateral` is active plus pending collateral after every
    /// outflow of the batch (fees, pool offset, surplus) has left.
    pub fn rebase_snapshots(&mut self, entire_collateral: u128) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = entire_collateral;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PositionStatus;

    const UNIT: u128 = DECIMAL_PRECISION;

    fn active(stake: u128, acc: &RewardAccumulator) -> Position {
        Position {
            collateral: stake,
            debt: stake,
            stake,
            status: PositionStatus::Active,
            snapshot: acc.snapshot(),
        }
    }

    #[test]
    fn test_pending_follows_stake_ratio() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = 6 * UNIT;
        let a = active(UNIT, &acc);
        let b = active(2 * UNIT, &acc);
        let c = active(3 * UNIT, &acc);

        acc.redistribute(60 * UNIT, 6 * UNIT).unwrap();

        assert_eq!(acc.pending_debt(&a).unwrap(), 10 * UNIT);
        assert_eq!(acc.pending_debt(&b).unwrap(), 20 * UNIT);
        assert_eq!(acc.pending_debt(&c).unwrap(), 30 * UNIT);
        assert_eq!(acc.pending_collateral(&c).unwrap(), 3 * UNIT);
    }

    #[test]
    fn test_inactive_position_has_no_pending() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = UNIT;
        let mut p = active(UNIT, &acc);
        acc.redistribute(UNIT, UNIT).unwrap();

        p.status = PositionStatus::ClosedByOwner;
        assert_eq!(acc.pending_collateral(&p).unwrap(), 0);
        assert!(!acc.has_pending(&p));
    }

    #[test]
    fn test_redistribute_without_stake_fails() {
        let mut acc = RewardAccumulator::new();
        assert!(acc.redistribute(1, 1).is_err());
        // Nothing to spread is always fine
        assert!(acc.redistribute(0, 0).is_ok());
    }

    #[test]
    fn test_truncation_never_overpays() {
        let mut acc = RewardAccumulator::new();
        acc.total_stakes = 3;
        let p = active(1, &acc);

        // 1 wei over 3 stake units
        for _ in 0..3 {
            acc.redistribute(1, 1).unwrap();
        }
        // Three redistributions of 1 wei; a 1/3 share of 3 wei is exactly 1
        assert_eq!(acc.pending_debt(&p).unwrap(), 1);
    }

    #[test]
    fn test_compute_stake_uses_snapshot_ratio() {
        let mut acc = RewardAccumulator::new();
        assert_eq!(acc.compute_stake(5 * UNIT).unwrap(), 5 * UNIT);

        // After a liquidation: 10 stake units backed by 20 collateral
        acc.total_stakes = 10 * UNIT;
        acc.rebase_snapshots(20 * UNIT);
        assert_eq!(acc.compute_stake(4 * UNIT).unwrap(), 2 * UNIT);
    }

    #[test]
    fn test_update_stake() {
        let mut acc = RewardAccumulator::new();
        acc.update_stake(0, 10).unwrap();
        acc.update_stake(10, 4).unwrap();
        assert_eq!(acc.total_stakes, 4);
        acc.remove_stake(4);
        assert_eq!(acc.total_stakes, 0);
    }
}
