//! System mode selection
//!
//! Mode is a pure function of aggregate collateral, aggregate debt and price.
//! Nothing is stored, so it cannot drift from the ledger.

use crate::math::collateral_ratio;
use crate::state::Params;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SystemMode {
    Normal,
    /// System ratio below `defensive_ratio`: stricter liquidation threshold
    Defensive,
}

impl SystemMode {
    pub fn from_ratio(total_ratio: u128, params: &Params) -> Self {
        if total_ratio < params.defensive_ratio {
            SystemMode::Defensive
        } else {
            SystemMode::Normal
        }
    }

    pub fn evaluate(entire_collateral: u128, entire_debt: u128, price: u128, params: &Params) -> Self {
        Self::from_ratio(collateral_ratio(entire_collateral, entire_debt, price), params)
    }

    pub fn is_defensive(self) -> bool {
        self == SystemMode::Defensive
    }
}
