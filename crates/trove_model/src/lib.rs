//! Liquidation and pool-share accounting core for a collateralized debt protocol
//! No I/O, no unwrap/panic in library code; every operation commits atomically

mod changeset;
pub mod error;
pub mod helpers;
pub mod ledger;
pub mod lifecycle;
pub mod liquidation;
pub mod math;
pub mod mode;
pub mod oracle;
pub mod protocol;
pub mod redistribution;
pub mod sorted;
pub mod stability_pool;
pub mod state;

// Re-export commonly used types
pub use error::{CdpError, Result};
pub use ledger::{InMemoryLedger, PositionLedger};
pub use lifecycle::{Adjustment, Closed};
pub use liquidation::{
    LiquidatedPosition, LiquidationKind, LiquidationOutcome, LiquidationTotals, Split, MAX_BATCH_LIQUIDATIONS,
};
pub use mode::SystemMode;
pub use oracle::{FixedPrice, PriceFeed, PriceReading};
pub use protocol::{EntirePosition, Protocol};
pub use redistribution::RewardAccumulator;
pub use sorted::{OrderedIndex, SortedPositions};
pub use stability_pool::{Deposit, OffsetReport, PoolPayout, PoolSnapshot, PoolState, StabilityPool};
pub use state::*;
