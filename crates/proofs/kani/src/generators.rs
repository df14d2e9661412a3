//! Generators for arbitrary protocol state (for Kani)

#[cfg(kani)]
use kani::any;
use trove_model::math::DECIMAL_PRECISION;
use trove_model::{CdpError, DepositorId, Deposit, FixedPrice, Params, PoolState, PositionId, Protocol};

use crate::sanitizer::{Seed, N_POSITIONS};
#[cfg(kani)]
use crate::sanitizer::{Sanitize, N_DEPOSITORS};

pub type ProofProtocol = Protocol<FixedPrice>;

const UNIT: u128 = DECIMAL_PRECISION;

/// Open the seeded positions and deposits, then move to the shock price
pub fn protocol_from_seed(seed: &Seed) -> Result<ProofProtocol, CdpError> {
    let params = Params::default();
    let net_debt = params.min_net_debt;
    let mut p = Protocol::new(params, FixedPrice::new(seed.opening_price * UNIT))?;

    let count = (seed.position_count as usize).min(N_POSITIONS);
    for (i, c) in seed.collateral.iter().take(count).enumerate() {
        p.open_position(PositionId(i as u64 + 1), c * UNIT, net_debt)?;
    }
    for (i, d) in seed.deposits.iter().enumerate() {
        if *d > 0 {
            p.provide_to_pool(DepositorId(i as u64 + 1), d * UNIT)?;
        }
    }

    p.feed_mut().set(seed.shock_price * UNIT);
    Ok(p)
}

/// Pool holding the given deposits, all made at the current snapshot
pub fn pool_with_deposits<const N: usize>(params: &Params, amounts: [u128; N]) -> (PoolState, [Deposit; N]) {
    let mut state = PoolState::new(params);
    let snapshot = state.snapshot();
    let deposits = amounts.map(|initial_value| Deposit { initial_value, snapshot });
    state.total_deposits = amounts.iter().fold(0u128, |acc, a| acc.saturating_add(*a));
    (state, deposits)
}

#[cfg(kani)]
pub fn any_seed() -> Seed {
    let count_raw: u8 = any();
    let c0: u8 = any();
    let c1: u8 = any();
    let c2: u8 = any();
    let d0: u16 = any();
    let d1: u16 = any();
    let open_raw: u16 = any();
    let shock_raw: u16 = any();

    let mut deposits = [0u128; N_DEPOSITORS];
    deposits[0] = d0 as u128;
    deposits[1] = d1 as u128;

    Seed {
        position_count: count_raw,
        collateral: [c0 as u128, c1 as u128, c2 as u128],
        deposits,
        opening_price: open_raw as u128,
        shock_price: shock_raw as u128,
    }
}

#[cfg(kani)]
pub fn any_protocol_bounded() -> ProofProtocol {
    let p = protocol_from_seed(&any_seed().sanitize());
    kani::assume(p.is_ok());
    match p {
        Ok(p) => p,
        Err(_) => unreachable!(),
    }
}

#[cfg(kani)]
pub fn any_params() -> Params {
    let min_raw: u128 = any();
    let def_raw: u128 = any();
    let fee_raw: u16 = any();
    let shifts_raw: u8 = any();

    Params {
        minimum_ratio: min_raw,
        defensive_ratio: def_raw,
        liquidation_fee_bps: fee_raw,
        max_scale_shifts: shifts_raw,
        ..Params::default()
    }
    .sanitize()
}
