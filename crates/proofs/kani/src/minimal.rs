//! Concrete Kani proofs: fixed scenarios first, symbolic ones in `safety`

use trove_model::helpers::*;
use trove_model::math::DECIMAL_PRECISION;
use trove_model::{DepositorId, FixedPrice, LiquidationKind, Params, PositionId, Protocol};
use crate::generators::pool_with_deposits;

const UNIT: u128 = DECIMAL_PRECISION;

/// Emptying the pool rolls the epoch and zeroes every older deposit
#[kani::proof]
fn full_offset_zeroes_deposits() {
    let params = Params::default();
    let (mut state, deposits) = pool_with_deposits(&params, [600 * UNIT, 400 * UNIT]);

    let report = state.offset(1_000 * UNIT, 10 * UNIT);
    assert!(matches!(report, Ok(r) if r.epoch_advanced));
    assert_eq!(state.total_deposits, 0);
    assert_eq!(state.compounded(&deposits[0]), Ok(0));
    assert_eq!(state.compounded(&deposits[1]), Ok(0));
}

/// Half the pool absorbed: each deposit keeps half, rounded down by a few wei
#[kani::proof]
fn half_offset_halves_deposits() {
    let params = Params::default();
    let (mut state, deposits) = pool_with_deposits(&params, [600 * UNIT, 400 * UNIT]);

    assert!(state.offset(500 * UNIT, 5 * UNIT).is_ok());
    for (d, half) in deposits.iter().zip([300 * UNIT, 200 * UNIT]) {
        let value = state.compounded(d).unwrap_or(u128::MAX);
        assert!(value <= half && half - value < 1_000);
    }
}

/// Liquidating against a deep pool offsets the whole debt
#[kani::proof]
fn concrete_offset_liquidation() {
    let mut p = match Protocol::new(Params::default(), FixedPrice::new(200 * UNIT)) {
        Ok(p) => p,
        Err(_) => return,
    };
    assert!(p.open_position(PositionId(1), 15 * UNIT, 1_800 * UNIT).is_ok());
    assert!(p.open_position(PositionId(2), 60 * UNIT, 1_800 * UNIT).is_ok());
    assert!(p.provide_to_pool(DepositorId(1), 5_000 * UNIT).is_ok());

    p.feed_mut().set(140 * UNIT);
    let outcome = p.liquidate(PositionId(1));
    assert!(outcome.is_ok());
    if let Ok(o) = outcome {
        assert_eq!(o.liquidated[0].kind, LiquidationKind::Standard);
        assert_eq!(o.totals.debt_offset, 2_000 * UNIT);
        assert_eq!(o.totals.debt_redistributed, 0);
    }
    assert!(collateral_conserved(&p));
    assert!(debt_conserved(&p));
}
