//! Position lifecycle: open, adjust, close, claim surplus
//!
//! Only the checks that keep the liquidation core consistent live here:
//! ratio floors per mode, the minimum net debt and the protection reserve.
//! Borrowing fees and hints are out of scope.

use crate::error::{CdpError, OrOverflow, Result};
use crate::ledger::PositionLedger;
use crate::math::{collateral_ratio, nominal_ratio};
use crate::mode::SystemMode;
use crate::oracle::PriceFeed;
use crate::protocol::{entire_of, Protocol};
use crate::sorted::OrderedIndex;
use crate::state::{Params, Position, PositionId, PositionStatus};

/// Requested change to an open position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Adjustment {
    pub collateral_added: u128,
    pub collateral_withdrawn: u128,
    pub debt_drawn: u128,
    pub debt_repaid: u128,
}

impl Adjustment {
    pub fn is_empty(&self) -> bool {
        self.collateral_added == 0 && self.collateral_withdrawn == 0 && self.debt_drawn == 0 && self.debt_repaid == 0
    }
}

/// What the owner got back from closing a position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Closed {
    pub collateral: u128,
    /// Debt the owner repaid, excluding the protection reserve
    pub debt_repaid: u128,
}

fn require_ratio(ratio: u128, required: u128) -> Result<()> {
    if ratio < required {
        return Err(CdpError::BelowMinimumRatio { ratio, required });
    }
    Ok(())
}

fn require_net_debt(debt: u128, params: &Params) -> Result<()> {
    let net_debt = debt.saturating_sub(params.protection_reserve);
    if net_debt < params.min_net_debt {
        return Err(CdpError::DebtBelowMinimum {
            net_debt,
            minimum: params.min_net_debt,
        });
    }
    Ok(())
}

impl<F: PriceFeed, L: PositionLedger, I: OrderedIndex> Protocol<F, L, I> {
    /// Open a position with `collateral` and `net_debt` plus the reserve
    pub fn open_position(&mut self, id: PositionId, collateral: u128, net_debt: u128) -> Result<Position> {
        let price = self.fetch_price();
        if self.ledger.read(id).is_active() {
            return Err(CdpError::PositionExists(id));
        }
        if collateral == 0 {
            return Err(CdpError::ZeroAmount);
        }
        let debt = net_debt.checked_add(self.params.protection_reserve).or_overflow()?;
        require_net_debt(debt, &self.params)?;

        let icr = collateral_ratio(collateral, debt, price);
        let custody = &self.custody;
        let new_total_ratio = collateral_ratio(
            custody.entire_collateral().checked_add(collateral).or_overflow()?,
            custody.entire_debt().checked_add(debt).or_overflow()?,
            price,
        );
        match self.system_mode(price) {
            SystemMode::Defensive => require_ratio(icr, self.params.defensive_ratio)?,
            SystemMode::Normal => {
                require_ratio(icr, self.params.minimum_ratio)?;
                if new_total_ratio < self.params.defensive_ratio {
                    return Err(CdpError::DefensiveModeRestriction);
                }
            }
        }

        let mut cs = self.stage();
        let stake = cs.rewards.compute_stake(collateral)?;
        cs.rewards.update_stake(0, stake)?;
        let position = Position {
            collateral,
            debt,
            stake,
            status: PositionStatus::Active,
            snapshot: cs.rewards.snapshot(),
        };
        cs.write(id, position);
        cs.reinsert(id, nominal_ratio(collateral, debt));

        let c = &mut cs.custody;
        c.active_collateral = c.active_collateral.checked_add(collateral).or_overflow()?;
        c.active_debt = c.active_debt.checked_add(debt).or_overflow()?;
        c.reserve_pool = c.reserve_pool.checked_add(self.params.protection_reserve).or_overflow()?;
        c.collateral_deposited = c.collateral_deposited.checked_add(collateral).or_overflow()?;
        c.debt_issued = c.debt_issued.checked_add(debt).or_overflow()?;

        self.apply(cs);
        log::debug!("Opened position {} with collateral {} debt {}", id, collateral, debt);
        Ok(position)
    }

    /// Adjust an open position after realizing its pending rewards
    pub fn adjust_position(&mut self, id: PositionId, change: Adjustment) -> Result<Position> {
        let price = self.fetch_price();
        let current = self.ledger.read(id);
        if !current.is_active() {
            return Err(CdpError::InvalidTarget(id));
        }
        if change.is_empty() {
            return Err(CdpError::ZeroAmount);
        }
        if change.collateral_added > 0 && change.collateral_withdrawn > 0 {
            return Err(CdpError::InvalidParams("collateral added and withdrawn in one adjustment"));
        }

        let entire = entire_of(&self.rewards, &current)?;
        if change.collateral_withdrawn > entire.collateral {
            return Err(CdpError::InsufficientBalance {
                requested: change.collateral_withdrawn,
                available: entire.collateral,
            });
        }
        let repayable = entire.debt.saturating_sub(self.params.protection_reserve);
        if change.debt_repaid > repayable {
            return Err(CdpError::InsufficientBalance {
                requested: change.debt_repaid,
                available: repayable,
            });
        }

        let collateral = entire
            .collateral
            .checked_add(change.collateral_added)
            .and_then(|c| c.checked_sub(change.collateral_withdrawn))
            .or_overflow()?;
        let debt = entire
            .debt
            .checked_add(change.debt_drawn)
            .and_then(|d| d.checked_sub(change.debt_repaid))
            .or_overflow()?;
        require_net_debt(debt, &self.params)?;

        let old_icr = collateral_ratio(entire.collateral, entire.debt, price);
        let new_icr = collateral_ratio(collateral, debt, price);
        let custody = &self.custody;
        let new_total_ratio = collateral_ratio(
            custody
                .entire_collateral()
                .saturating_add(change.collateral_added)
                .saturating_sub(change.collateral_withdrawn),
            custody
                .entire_debt()
                .saturating_add(change.debt_drawn)
                .saturating_sub(change.debt_repaid),
            price,
        );

        match self.system_mode(price) {
            SystemMode::Defensive => {
                if change.collateral_withdrawn > 0 {
                    return Err(CdpError::DefensiveModeRestriction);
                }
                if change.debt_drawn > change.debt_repaid {
                    require_ratio(new_icr, self.params.defensive_ratio)?;
                    require_ratio(new_icr, old_icr)?;
                }
            }
            SystemMode::Normal => {
                require_ratio(new_icr, self.params.minimum_ratio)?;
                if new_total_ratio < self.params.defensive_ratio {
                    return Err(CdpError::DefensiveModeRestriction);
                }
            }
        }

        let mut cs = self.stage();
        cs.custody.realize_pending(entire.pending_collateral, entire.pending_debt);
        let stake = cs.rewards.compute_stake(collateral)?;
        cs.rewards.update_stake(current.stake, stake)?;
        let position = Position {
            collateral,
            debt,
            stake,
            status: PositionStatus::Active,
            snapshot: cs.rewards.snapshot(),
        };
        cs.write(id, position);
        cs.reinsert(id, nominal_ratio(collateral, debt));

        let c = &mut cs.custody;
        c.active_collateral = c
            .active_collateral
            .checked_add(change.collateral_added)
            .and_then(|v| v.checked_sub(change.collateral_withdrawn))
            .or_overflow()?;
        c.active_debt = c
            .active_debt
            .checked_add(change.debt_drawn)
            .and_then(|v| v.checked_sub(change.debt_repaid))
            .or_overflow()?;
        c.collateral_deposited = c.collateral_deposited.checked_add(change.collateral_added).or_overflow()?;
        c.collateral_withdrawn = c.collateral_withdrawn.checked_add(change.collateral_withdrawn).or_overflow()?;
        c.debt_issued = c.debt_issued.checked_add(change.debt_drawn).or_overflow()?;
        c.debt_repaid = c.debt_repaid.checked_add(change.debt_repaid).or_overflow()?;

        self.apply(cs);
        log::debug!("Adjusted position {}: collateral {} debt {}", id, collateral, debt);
        Ok(position)
    }

    /// Repay and close an open position
    ///
    /// The protection reserve is burned rather than repaid by the owner.
    pub fn close_position(&mut self, id: PositionId) -> Result<Closed> {
        let price = self.fetch_price();
        let current = self.ledger.read(id);
        if !current.is_active() {
            return Err(CdpError::InvalidTarget(id));
        }
        if self.index.count() <= 1 {
            return Err(CdpError::LastPositionProtected(id));
        }
        if self.system_mode(price).is_defensive() {
            return Err(CdpError::DefensiveModeRestriction);
        }

        let entire = entire_of(&self.rewards, &current)?;
        let custody = &self.custody;
        let remaining_ratio = collateral_ratio(
            custody.entire_collateral().saturating_sub(entire.collateral),
            custody.entire_debt().saturating_sub(entire.debt),
            price,
        );
        if remaining_ratio < self.params.defensive_ratio {
            return Err(CdpError::DefensiveModeRestriction);
        }

        let mut cs = self.stage();
        cs.custody.realize_pending(entire.pending_collateral, entire.pending_debt);
        cs.rewards.remove_stake(current.stake);
        cs.write(id, Position::closed(PositionStatus::ClosedByOwner));
        cs.unindex(id);

        let reserve = self.params.protection_reserve.min(cs.custody.reserve_pool);
        let c = &mut cs.custody;
        c.active_collateral = c.active_collateral.checked_sub(entire.collateral).or_overflow()?;
        c.active_debt = c.active_debt.checked_sub(entire.debt).or_overflow()?;
        c.reserve_pool -= reserve;
        c.collateral_withdrawn = c.collateral_withdrawn.checked_add(entire.collateral).or_overflow()?;
        c.debt_repaid = c.debt_repaid.checked_add(entire.debt).or_overflow()?;

        self.apply(cs);
        log::debug!("Closed position {}", id);
        Ok(Closed {
            collateral: entire.collateral,
            debt_repaid: entire.debt.saturating_sub(reserve),
        })
    }

    /// Pay out collateral left over from a capped liquidation
    pub fn claim_collateral_surplus(&mut self, id: PositionId) -> Result<u128> {
        let amount = match self.surplus.get(&id) {
            Some(&amount) if amount > 0 => amount,
            _ => return Err(CdpError::NoSurplus(id)),
        };

        let mut cs = self.stage();
        cs.surplus.remove(&id);
        let c = &mut cs.custody;
        c.surplus_collateral = c.surplus_collateral.checked_sub(amount).or_overflow()?;
        c.collateral_withdrawn = c.collateral_withdrawn.checked_add(amount).or_overflow()?;

        self.apply(cs);
        log::debug!("Position {} claimed surplus {}", id, amount);
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::DECIMAL_PRECISION;
    use crate::oracle::FixedPrice;

    const UNIT: u128 = DECIMAL_PRECISION;

    fn protocol() -> Protocol<FixedPrice> {
        Protocol::new(Params::default(), FixedPrice::new(200 * UNIT)).unwrap()
    }

    #[test]
    fn test_open_adds_reserve_and_stake() {
        let mut p = protocol();
        let pos = p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT).unwrap();
        // 2000 net + 200 reserve
        assert_eq!(pos.debt, 2_200 * UNIT);
        assert_eq!(pos.stake, 20 * UNIT);
        assert_eq!(p.custody().reserve_pool, 200 * UNIT);
        assert_eq!(p.rewards().total_stakes, 20 * UNIT);
        assert_eq!(p.active_count(), 1);
    }

    #[test]
    fn test_open_rejections() {
        let mut p = protocol();
        assert_eq!(
            p.open_position(PositionId(1), 20 * UNIT, 100 * UNIT),
            Err(CdpError::DebtBelowMinimum {
                net_debt: 100 * UNIT,
                minimum: 1_800 * UNIT
            })
        );
        // 11 * 200 / 2200 = 100%
        assert!(matches!(
            p.open_position(PositionId(1), 11 * UNIT, 2_000 * UNIT),
            Err(CdpError::BelowMinimumRatio { .. })
        ));
        // 130% is fine for the position but drags the system under 150%
        assert_eq!(
            p.open_position(PositionId(1), 143 * UNIT / 10, 2_000 * UNIT),
            Err(CdpError::DefensiveModeRestriction)
        );
        assert_eq!(p.active_count(), 0);

        p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT).unwrap();
        assert_eq!(
            p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT),
            Err(CdpError::PositionExists(PositionId(1)))
        );
    }

    #[test]
    fn test_adjust_updates_position_and_custody() {
        let mut p = protocol();
        p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT).unwrap();
        let pos = p
            .adjust_position(
                PositionId(1),
                Adjustment {
                    collateral_added: 5 * UNIT,
                    debt_drawn: 300 * UNIT,
                    ..Adjustment::default()
                },
            )
            .unwrap();
        assert_eq!(pos.collateral, 25 * UNIT);
        assert_eq!(pos.debt, 2_500 * UNIT);
        assert_eq!(p.custody().active_collateral, 25 * UNIT);
        assert_eq!(p.custody().debt_issued, 2_500 * UNIT);
        assert_eq!(p.rewards().total_stakes, 25 * UNIT);
    }

    #[test]
    fn test_adjust_cannot_repay_reserve() {
        let mut p = protocol();
        p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT).unwrap();
        let err = p
            .adjust_position(
                PositionId(1),
                Adjustment {
                    debt_repaid: 2_100 * UNIT,
                    ..Adjustment::default()
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            CdpError::InsufficientBalance {
                requested: 2_100 * UNIT,
                available: 2_000 * UNIT
            }
        );
        assert_eq!(
            p.adjust_position(PositionId(1), Adjustment::default()),
            Err(CdpError::ZeroAmount)
        );
    }

    #[test]
    fn test_close_returns_collateral() {
        let mut p = protocol();
        p.open_position(PositionId(1), 20 * UNIT, 2_000 * UNIT).unwrap();
        assert_eq!(p.close_position(PositionId(1)), Err(CdpError::LastPositionProtected(PositionId(1))));

        p.open_position(PositionId(2), 30 * UNIT, 2_000 * UNIT).unwrap();
        let closed = p.close_position(PositionId(1)).unwrap();
        assert_eq!(closed.collateral, 20 * UNIT);
        assert_eq!(closed.debt_repaid, 2_000 * UNIT);
        assert_eq!(p.position(PositionId(1)).status, PositionStatus::ClosedByOwner);
        assert_eq!(p.custody().reserve_pool, 200 * UNIT);
        assert_eq!(p.rewards().total_stakes, 30 * UNIT);
        assert_eq!(p.close_position(PositionId(1)), Err(CdpError::InvalidTarget(PositionId(1))));
    }

    #[test]
    fn test_claim_without_surplus() {
        let mut p = protocol();
        assert_eq!(p.claim_collateral_surplus(PositionId(3)), Err(CdpError::NoSurplus(PositionId(3))));
    }
}
