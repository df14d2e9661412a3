//! Core state model: positions, parameters and custody totals

use core::fmt;

use crate::error::{CdpError, Result};
use crate::math::DECIMAL_PRECISION;

/// Position (trove) identifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stability pool depositor identifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DepositorId(pub u64);

impl fmt::Display for DepositorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PositionStatus {
    #[default]
    Nonexistent,
    Active,
    ClosedByOwner,
    ClosedByLiquidation,
    ClosedByRedemption,
}

/// Accumulator values a position last settled against
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RewardSnapshot {
    pub collateral: u128,
    pub debt: u128,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub collateral: u128,
    /// Includes the protection reserve
    pub debt: u128,
    /// Redistribution weight
    pub stake: u128,
    pub status: PositionStatus,
    pub snapshot: RewardSnapshot,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Terminal record left in the ledger once a position closes
    pub fn closed(status: PositionStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Protocol parameters (governance configurable)
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Params {
    /// Liquidation threshold for individual positions (1e18 = 100%)
    pub minimum_ratio: u128,
    /// System ratio below which defensive mode applies; also the higher
    /// per-position threshold used in defensive mode
    pub defensive_ratio: u128,
    /// Debt reserved at open and paid to the liquidator
    pub protection_reserve: u128,
    /// Collateral fee paid to the liquidator, in bps of the position's collateral
    pub liquidation_fee_bps: u16,
    /// Minimum debt excluding the protection reserve
    pub min_net_debt: u128,
    /// Precision floor for the pool product `P`; one scale shift multiplies by this
    pub scale_factor: u128,
    /// Scale shifts allowed within a single offset
    pub max_scale_shifts: u8,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            minimum_ratio: 1_100_000_000_000_000_000,      // 110%
            defensive_ratio: 1_500_000_000_000_000_000,    // 150%
            protection_reserve: 200 * DECIMAL_PRECISION,
            liquidation_fee_bps: 50,                        // 0.5%
            min_net_debt: 1_800 * DECIMAL_PRECISION,
            scale_factor: 1_000_000_000,                    // 1e9
            max_scale_shifts: 2,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        if self.minimum_ratio <= DECIMAL_PRECISION {
            return Err(CdpError::InvalidParams("minimum_ratio must exceed 100%"));
        }
        if self.defensive_ratio < self.minimum_ratio {
            return Err(CdpError::InvalidParams("defensive_ratio below minimum_ratio"));
        }
        if self.liquidation_fee_bps as u128 >= crate::math::BPS_DENOMINATOR {
            return Err(CdpError::InvalidParams("liquidation_fee_bps must be below 100%"));
        }
        if self.scale_factor < 2 || DECIMAL_PRECISION % self.scale_factor != 0 {
            return Err(CdpError::InvalidParams("scale_factor must divide 1e18"));
        }
        if self.max_scale_shifts == 0 {
            return Err(CdpError::InvalidParams("max_scale_shifts must be at least 1"));
        }
        let reach = self
            .scale_factor
            .checked_pow(self.max_scale_shifts as u32)
            .ok_or(CdpError::InvalidParams("scale_factor^max_scale_shifts overflows"))?;
        if reach > DECIMAL_PRECISION || DECIMAL_PRECISION % reach != 0 {
            return Err(CdpError::InvalidParams("scale_factor^max_scale_shifts must divide 1e18"));
        }
        Ok(())
    }
}

/// Where every unit of collateral and debt currently sits
///
/// `active_*` is held by open positions, `default_*` has been redistributed
/// but not yet realized into positions. Outflows are counted so conservation
/// can be checked without replaying history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Custody {
    pub active_collateral: u128,
    pub active_debt: u128,
    pub default_collateral: u128,
    pub default_debt: u128,
    /// Capped-liquidation excess owed to former owners
    pub surplus_collateral: u128,
    /// Protection reserves held for open positions
    pub reserve_pool: u128,

    pub collateral_deposited: u128,
    pub collateral_withdrawn: u128,
    pub liquidation_fees_paid: u128,
    pub reserves_paid: u128,

    pub debt_issued: u128,
    pub debt_repaid: u128,
}

impl Custody {
    /// Collateral backing open positions, realized or pending
    pub fn entire_collateral(&self) -> u128 {
        self.active_collateral.saturating_add(self.default_collateral)
    }

    pub fn entire_debt(&self) -> u128 {
        self.active_debt.saturating_add(self.default_debt)
    }

    /// Realize pending redistribution into a position
    pub(crate) fn realize_pending(&mut self, collateral: u128, debt: u128) {
        self.default_collateral = self.default_collateral.saturating_sub(collateral);
        self.default_debt = self.default_debt.saturating_sub(debt);
        self.active_collateral = self.active_collateral.saturating_add(collateral);
        self.active_debt = self.active_debt.saturating_add(debt);
    }
}
