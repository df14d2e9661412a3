//! Shared fixtures for the integration tests

#![allow(dead_code)]

use trove_model::helpers;
use trove_model::math::DECIMAL_PRECISION;
use trove_model::{FixedPrice, Params, PositionId, Protocol};

pub const UNIT: u128 = DECIMAL_PRECISION;

pub type TestProtocol = Protocol<FixedPrice>;

pub fn protocol_at(price: u128) -> TestProtocol {
    Protocol::new(Params::default(), FixedPrice::new(price)).unwrap()
}

/// Open with the minimum net debt: 1800 + 200 reserve = 2000 total
pub fn open(p: &mut TestProtocol, id: u64, collateral: u128) {
    p.open_position(PositionId(id), collateral, 1_800 * UNIT).unwrap();
}

pub fn set_price(p: &mut TestProtocol, price: u128) {
    p.feed_mut().set(price);
}

pub fn assert_close(actual: u128, expected: u128, tolerance: u128) {
    let diff = actual.abs_diff(expected);
    assert!(
        diff <= tolerance,
        "actual {} expected {} (diff {} > {})",
        actual,
        expected,
        diff,
        tolerance
    );
}

pub fn assert_invariants(p: &TestProtocol) {
    assert!(helpers::collateral_conserved(p), "collateral not conserved: {:?}", p.custody());
    assert!(helpers::debt_conserved(p), "debt not conserved: {:?}", p.custody());
    assert!(helpers::rounding_gap(p).unwrap().is_some(), "positions claim more than custody holds");
    assert!(helpers::total_stakes_consistent(p));
    assert!(helpers::index_matches_ledger(p));
}
