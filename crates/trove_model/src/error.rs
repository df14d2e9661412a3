//! Error taxonomy for the liquidation and pool accounting core
//!
//! Every variant is raised before any state is written, so a rejected
//! operation leaves the protocol exactly as it was.

use crate::state::{DepositorId, PositionId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CdpError {
    /// Liquidation or adjustment targeted a nonexistent or closed position
    #[error("position {0} does not exist or is not active")]
    InvalidTarget(PositionId),

    #[error("position {0} is healthy and cannot be liquidated")]
    NotLiquidatable(PositionId),

    #[error("position {0} is the last active position")]
    LastPositionProtected(PositionId),

    #[error("no position in the batch qualified for liquidation")]
    NothingToLiquidate,

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("requested {requested}, available {available}")]
    InsufficientBalance { requested: u128, available: u128 },

    #[error("depositor {0} has no deposit in the pool")]
    NoDeposit(DepositorId),

    /// Pool withdrawals wait until undercollateralized positions are liquidated
    #[error("pool withdrawal blocked: position {0} is below the minimum ratio")]
    WithdrawalBlocked(PositionId),

    #[error("position {0} is already active")]
    PositionExists(PositionId),

    #[error("collateral ratio {ratio} below required {required}")]
    BelowMinimumRatio { ratio: u128, required: u128 },

    #[error("operation not permitted while the system is in defensive mode")]
    DefensiveModeRestriction,

    #[error("net debt {net_debt} below minimum {minimum}")]
    DebtBelowMinimum { net_debt: u128, minimum: u128 },

    #[error("position {0} has no collateral surplus to claim")]
    NoSurplus(PositionId),

    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    #[error("arithmetic overflow")]
    Overflow,
}

pub type Result<T> = core::result::Result<T, CdpError>;

/// Lift an `Option` produced by checked arithmetic into `CdpError::Overflow`
pub(crate) trait OrOverflow<T> {
    fn or_overflow(self) -> Result<T>;
}

impl<T> OrOverflow<T> for Option<T> {
    fn or_overflow(self) -> Result<T> {
        self.ok_or(CdpError::Overflow)
    }
}
