//! State space sanitizer - bounds values for Kani exploration

use trove_model::math::DECIMAL_PRECISION;
use trove_model::Params;

pub const N_POSITIONS: usize = 3;
pub const N_DEPOSITORS: usize = 2;
pub const MAX_STEPS: u8 = 4;

/// Bounds for tractable verification, in whole units
const MIN_COLLATERAL: u128 = 12;
const MAX_COLLATERAL: u128 = 60;
const MIN_PRICE: u128 = 50;
const MAX_PRICE: u128 = 300;
const MAX_DEPOSIT: u128 = 6_000;
const MAX_FEE_BPS: u16 = 500;

/// Raw inputs for one protocol setup, in whole units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Seed {
    pub position_count: u8,
    pub collateral: [u128; N_POSITIONS],
    pub deposits: [u128; N_DEPOSITORS],
    pub opening_price: u128,
    pub shock_price: u128,
}

pub trait Sanitize {
    fn sanitize(self) -> Self;
}

fn clamp_into(v: u128, lo: u128, hi: u128) -> u128 {
    lo + v % (hi - lo + 1)
}

impl Sanitize for Seed {
    fn sanitize(mut self) -> Seed {
        // At least two positions so liquidation is reachable
        self.position_count = 2 + self.position_count % (N_POSITIONS as u8 - 1);

        for c in self.collateral.iter_mut() {
            *c = clamp_into(*c, MIN_COLLATERAL, MAX_COLLATERAL);
        }
        for d in self.deposits.iter_mut() {
            *d %= MAX_DEPOSIT + 1;
        }

        // 12 units at 250 back 2000 debt at exactly 150%, so every position opens
        self.opening_price = clamp_into(self.opening_price, 250, MAX_PRICE);
        self.shock_price = clamp_into(self.shock_price, MIN_PRICE, MAX_PRICE);
        self
    }
}

impl Sanitize for Params {
    fn sanitize(mut self) -> Params {
        let pct = DECIMAL_PRECISION / 100;

        // Minimum ratio between 101% and 200%
        self.minimum_ratio = DECIMAL_PRECISION + pct * (1 + (self.minimum_ratio / pct) % 100);
        if self.defensive_ratio < self.minimum_ratio {
            self.defensive_ratio = self.minimum_ratio;
        }
        self.defensive_ratio = self.defensive_ratio.min(3 * DECIMAL_PRECISION);
        self.liquidation_fee_bps %= MAX_FEE_BPS;
        self.protection_reserve %= 1_000 * DECIMAL_PRECISION;
        self.min_net_debt %= 10_000 * DECIMAL_PRECISION;

        // Keep the pool precision at the only combination the proofs bound
        self.scale_factor = 1_000_000_000;
        self.max_scale_shifts = 1 + self.max_scale_shifts % 2;
        self
    }
}
