//! Integer proportional arithmetic.
//!
//! Every share conversion in the engine is `a * num / den` over u64
//! balances. Widening to u128 makes the intermediate product exact, and the
//! floor/ceil split encodes the value-conservation policy: minting and
//! redemption floor (never create value, never over-pay), withdrawal share
//! burn ceils (never under-burn).

use crate::types::Balance;

/// `a * num / den`, rounded down. `den == 0` yields 0.
pub fn prop(a: Balance, num: Balance, den: Balance) -> Balance {
    if den == 0 {
        return 0;
    }
    ((a as u128 * num as u128) / den as u128) as Balance
}

/// `a * num / den`, rounded up. `den == 0` yields 0.
pub fn prop_ceil(a: Balance, num: Balance, den: Balance) -> Balance {
    if den == 0 {
        return 0;
    }
    let p = a as u128 * num as u128;
    p.div_ceil(den as u128) as Balance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_and_ceil_bracket_exact_value() {
        assert_eq!(prop(10, 1, 4), 2);
        assert_eq!(prop_ceil(10, 1, 4), 3);
        assert_eq!(prop(10, 2, 4), 5);
        assert_eq!(prop_ceil(10, 2, 4), 5);
    }

    #[test]
    fn zero_denominator_is_zero() {
        assert_eq!(prop(10, 5, 0), 0);
        assert_eq!(prop_ceil(10, 5, 0), 0);
    }

    #[test]
    fn no_overflow_at_u64_max() {
        assert_eq!(prop(u64::MAX, u64::MAX, u64::MAX), u64::MAX);
        assert_eq!(prop_ceil(u64::MAX, 1, u64::MAX), 1);
    }
}
