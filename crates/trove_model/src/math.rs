//! Fixed-point arithmetic helpers - no unwrap, no panics
//!
//! Amounts, prices and ratios are u128 scaled by `DECIMAL_PRECISION` (1e18).
//! Products that can exceed 128 bits go through a 256-bit intermediate
//! (`widening_mul` + `div_rem_wide`), so `a * b / c` is exact whenever the
//! quotient itself fits in a u128.

/// 1.0 in fixed-point
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Nominal collateral ratio scale (1e20), used for price-independent ordering
pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

/// Basis point denominator
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Add u128 with saturation at MAX
pub fn add_u128(a: u128, b: u128) -> u128 {
    a.saturating_add(b)
}

/// Subtract u128 with saturation at 0
pub fn sub_u128(a: u128, b: u128) -> u128 {
    a.saturating_sub(b)
}

/// Minimum of two u128
pub fn min_u128(a: u128, b: u128) -> u128 {
    if a < b { a } else { b }
}

/// Full 256-bit product of two u128 values as `(hi, lo)`
pub fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;

    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    // Middle column can carry up to two bits into the high word
    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let lo = (ll & MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);

    (hi, lo)
}

/// Divide the 256-bit value `(hi, lo)` by `d`
///
/// Returns `(quotient, remainder)`, or `None` if `d == 0` or the quotient
/// does not fit in 128 bits (`hi >= d`).
pub fn div_rem_wide(hi: u128, lo: u128, d: u128) -> Option<(u128, u128)> {
    if d == 0 || hi >= d {
        return None;
    }

    // Restoring long division, one bit of `lo` per step.
    // Invariant: rem < d at the top of every iteration.
    let mut rem = hi;
    let mut quo: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        quo <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quo |= 1;
        }
    }

    Some((quo, rem))
}

/// `floor(a * b / c)` together with the remainder
pub fn mul_div_rem(a: u128, b: u128, c: u128) -> Option<(u128, u128)> {
    let (hi, lo) = widening_mul(a, b);
    div_rem_wide(hi, lo, c)
}

/// `floor(a * b / c)`, `None` on division by zero or quotient overflow
pub fn mul_div(a: u128, b: u128, c: u128) -> Option<u128> {
    mul_div_rem(a, b, c).map(|(q, _)| q)
}

/// Fixed-point multiply: `floor(a * b / 1e18)`
pub fn dec_mul(a: u128, b: u128) -> Option<u128> {
    mul_div(a, b, DECIMAL_PRECISION)
}

/// `amount * bps / 10_000` (floor)
pub fn bps_of(amount: u128, bps: u16) -> u128 {
    mul_div(amount, bps as u128, BPS_DENOMINATOR).unwrap_or(0)
}

/// Collateral ratio `collateral * price / debt` in 1e18 scale
///
/// Zero debt is unbounded and reported as `u128::MAX`; a ratio too large to
/// represent saturates the same way.
pub fn collateral_ratio(collateral: u128, debt: u128, price: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div(collateral, price, debt).unwrap_or(u128::MAX)
}

/// Price-independent ratio `collateral * 1e20 / debt`
pub fn nominal_ratio(collateral: u128, debt: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    mul_div(collateral, NICR_PRECISION, debt).unwrap_or(u128::MAX)
}

/// Per-unit share `(amount * 1e18 + carry) / total` with the remainder fed back
///
/// `carry` is the remainder left by the previous call (always `< total`).
/// Returns `(per_unit, new_carry)`. Rounds down, so the distributed sum never
/// exceeds `amount`; the truncated part is carried into the next call.
pub fn per_unit_with_carry(amount: u128, total: u128, carry: u128) -> Option<(u128, u128)> {
    let (q, r) = mul_div_rem(amount, DECIMAL_PRECISION, total)?;
    let carry = min_u128(carry, total.saturating_sub(1));
    let r = r.checked_add(carry)?;
    if r >= total {
        Some((q.checked_add(1)?, r - total))
    } else {
        Some((q, r))
    }
}

/// Per-unit loss `(amount * 1e18 - carry) / total + 1`, biased upwards
///
/// Rounding up keeps compounded deposits at or below their exact value. The
/// over-charge is returned as the new carry and subtracted next time.
pub fn loss_per_unit_with_carry(amount: u128, total: u128, carry: u128) -> Option<(u128, u128)> {
    let (q, r) = mul_div_rem(amount, DECIMAL_PRECISION, total)?;
    let carry = min_u128(carry, total);
    let (q, r) = if r >= carry {
        (q, r - carry)
    } else if q > 0 {
        // Borrow one unit of `total` from the quotient
        (q - 1, r + (total - carry))
    } else {
        (0, 0)
    };
    let loss = q.checked_add(1)?;
    Some((loss, total - r))
}
