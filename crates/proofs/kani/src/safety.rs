//! Kani safety proofs for the accounting invariants

use kani::{any, assume};
use trove_model::helpers::*;
use trove_model::liquidation::{split_capped, split_offset};
use trove_model::math::{loss_per_unit_with_carry, mul_div, per_unit_with_carry, DECIMAL_PRECISION};
use trove_model::{CdpError, PositionId, RewardAccumulator};
use crate::{adversary::*, generators::*};

/// Conservation and stake bookkeeping hold across short adversary sequences,
/// and every rejected move leaves the protocol untouched
#[kani::proof]
#[kani::unwind(6)]
fn conservation_holds_across_short_adversary_sequences() {
    let mut p = any_protocol_bounded();
    kani::assert(collateral_conserved(&p), "collateral conserved at start");

    let plan = any_plan();
    let outcome = run_plan(&mut p, &plan);

    kani::assert(outcome.is_ok(), "rejected move must not change state");
    kani::assert(collateral_conserved(&p), "collateral conserved");
    kani::assert(debt_conserved(&p), "debt conserved");
    kani::assert(total_stakes_consistent(&p), "stakes match the accumulator");
    kani::assert(index_matches_ledger(&p), "index holds exactly the active positions");
}

/// The last open position can never be liquidated, at any price
#[kani::proof]
fn last_position_never_liquidated() {
    let mut p = any_protocol_bounded();
    let price: u16 = any();

    // Close down to one position at a price where closing is always allowed
    p.feed_mut().set(300 * DECIMAL_PRECISION);
    while p.active_count() > 1 {
        let id = PositionId(p.active_count() as u64);
        if p.close_position(id).is_err() {
            return;
        }
    }
    p.feed_mut().set((price as u128 + 1) * DECIMAL_PRECISION / 4);

    let before = p.clone();
    kani::assert(
        matches!(p.liquidate(PositionId(1)), Err(CdpError::LastPositionProtected(_))),
        "last position must be protected",
    );
    kani::assert(p.liquidate_batch(4).is_err(), "batch must refuse");
    kani::assert(p == before, "state unchanged");
}

/// Offset splits route every unit of collateral and debt somewhere
#[kani::proof]
fn split_offset_conserves() {
    let collateral: u64 = any();
    let debt: u64 = any();
    let pool: u64 = any();
    let fee_bps: u16 = any();
    assume(fee_bps < 10_000);

    if let Ok(s) = split_offset(collateral as u128, debt as u128, pool as u128, fee_bps) {
        kani::assert(
            s.collateral_fee + s.collateral_to_pool + s.collateral_redistributed + s.surplus == collateral as u128,
            "collateral split sums to the position's collateral",
        );
        kani::assert(s.debt_offset + s.debt_redistributed == debt as u128, "debt split sums to the debt");
        kani::assert(s.debt_offset <= pool as u128, "never offsets more than the pool holds");
    }
}

/// Capped offsets never pay the pool more than the minimum-ratio worth
#[kani::proof]
fn split_capped_bounded() {
    let params = any_params();
    let collateral: u64 = any();
    let debt: u64 = any();
    let price: u64 = any();
    assume(price > 0);

    if let Ok(s) = split_capped(collateral as u128, debt as u128, price as u128, &params) {
        kani::assert(
            s.collateral_fee + s.collateral_to_pool + s.surplus == collateral as u128,
            "capped split sums to the position's collateral",
        );
        kani::assert(s.debt_offset == debt as u128, "capped offset takes the whole debt");
        if let Some(worth) = mul_div(debt as u128, params.minimum_ratio, price as u128) {
            kani::assert(s.collateral_fee + s.collateral_to_pool <= worth, "pool paid at most the capped worth");
        }
    }
}

/// Wide multiply-divide agrees with native arithmetic where that cannot overflow
#[kani::proof]
fn mul_div_matches_native() {
    let a: u64 = any();
    let b: u64 = any();
    let c: u64 = any();
    assume(c > 0);

    let expected = (a as u128 * b as u128) / c as u128;
    kani::assert(mul_div(a as u128, b as u128, c as u128) == Some(expected), "mul_div exact");
}

/// Gain distribution with error feedback never hands out more than it was given
#[kani::proof]
fn per_unit_carry_exact() {
    let amount: u32 = any();
    let total: u32 = any();
    let carry: u32 = any();
    assume(total > 0 && carry < total);

    if let Some((per_unit, next)) = per_unit_with_carry(amount as u128, total as u128, carry as u128) {
        kani::assert(next < total as u128, "carry stays below total");
        kani::assert(
            per_unit * total as u128 + next == amount as u128 * DECIMAL_PRECISION + carry as u128,
            "nothing created or lost",
        );
    }
}

/// Loss per unit is biased upwards net of the previous over-charge
#[kani::proof]
fn loss_per_unit_never_undercharges() {
    let amount: u32 = any();
    let total: u32 = any();
    let carry: u32 = any();
    assume(total > 0 && carry <= total);

    if let Some((loss, next)) = loss_per_unit_with_carry(amount as u128, total as u128, carry as u128) {
        kani::assert(next <= total as u128, "over-charge bounded by total");
        kani::assert(
            loss * total as u128 + carry as u128 >= amount as u128 * DECIMAL_PRECISION,
            "depositors always absorb at least the offset debt",
        );
    }
}

/// A single offset never leaves deposits worth more than before, and gains
/// never exceed what the pool received
#[kani::proof]
fn offset_never_inflates_deposits() {
    let params = any_params();
    let a: u16 = any();
    let b: u16 = any();
    let debt: u16 = any();
    let collateral: u16 = any();
    assume(a > 0 && b > 0);

    let unit = DECIMAL_PRECISION;
    let (mut state, deposits) = pool_with_deposits(&params, [a as u128 * unit, b as u128 * unit]);
    let debt = (debt as u128 * unit) % (state.total_deposits + 1);
    assume(debt > 0);

    if state.offset(debt, collateral as u128 * unit).is_err() {
        return;
    }

    let mut gains = 0u128;
    for d in &deposits {
        if let (Ok(value), Ok(gain)) = (state.compounded(d), state.collateral_gain(d)) {
            kani::assert(value <= d.initial_value, "compounded deposit never grows");
            gains += gain;
        }
    }
    kani::assert(gains <= state.collateral_balance, "gains covered by pool collateral");
}

/// Redistribution pays out at most what was redistributed
#[kani::proof]
fn redistribution_never_overpays() {
    let s1: u16 = any();
    let s2: u16 = any();
    let debt: u32 = any();
    let collateral: u32 = any();
    assume(s1 > 0 && s2 > 0);

    let mut acc = RewardAccumulator::new();
    let snapshot = acc.snapshot();
    if acc.update_stake(0, s1 as u128 + s2 as u128).is_err() {
        return;
    }
    if acc.redistribute(debt as u128, collateral as u128).is_err() {
        return;
    }

    let pos = |stake: u16| trove_model::Position {
        collateral: 1,
        debt: 1,
        stake: stake as u128,
        status: trove_model::PositionStatus::Active,
        snapshot,
    };
    if let (Ok(c1), Ok(c2), Ok(d1), Ok(d2)) = (
        acc.pending_collateral(&pos(s1)),
        acc.pending_collateral(&pos(s2)),
        acc.pending_debt(&pos(s1)),
        acc.pending_debt(&pos(s2)),
    ) {
        kani::assert(c1 + c2 <= collateral as u128, "collateral not over-distributed");
        kani::assert(d1 + d2 <= debt as u128, "debt not over-distributed");
    }
}
