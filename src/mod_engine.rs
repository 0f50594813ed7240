//! # MOD_ENGINE — modular step U <- (U^2 - 2) mod N
//!
//! Implements the shift-and-add reduction specific to `N = h*2^n - 1`: split
//! `T = U^2 - 2` into `J = floor(T / 2^n)` and `K = T mod 2^n`, then
//! `U' = q + r*2^n + K (mod N)` where `(q, r) = (floor(J/h), J mod h)`.
//! Never materializes a division by the full N — only shifts, a truncated
//! division by the small integer h, additions, and a defensive subtraction
//! loop against N.
//!
//! **Grounding**: the teacher's `kbn::llr_test` instead calls
//! `u.square_mut(); u -= 2u32; u = u.rem_euc(candidate);`, letting GMP do a
//! full division by the (large) candidate on every iteration. MOD_ENGINE
//! keeps the teacher's in-place-mutation style (`square_mut`, avoiding a
//! fresh allocation for the square) but replaces that general reduction
//! with the N-specific identity spec.md §4.2 requires, which only divides
//! by the small `h`.
//!
//! This is a pure function of `(U, h, n, N)`: identical inputs always
//! produce identical outputs, and it never performs I/O or fails — its one
//! precondition (`0 <= U < N`) is guaranteed by the caller.

use rug::ops::{DivRounding, RemRounding};
use rug::Integer;

/// Advance one Lucas term: `U' = (U^2 - 2) mod N`, for `N = h*2^n - 1`.
///
/// `two_pow_n` is `2^n`, precomputed once by the caller (it does not change
/// across the O(n) iterations of the driver loop) to avoid reallocating it
/// on every step.
pub fn step(u: &Integer, h: &Integer, two_pow_n: &Integer, n: u32, modulus: &Integer) -> Integer {
    let mut t = u.clone();
    t.square_mut();
    t -= 2u32;

    let j = Integer::from(&t >> n);
    let k = Integer::from(&t - Integer::from(&j << n));

    let q = j.clone().div_floor(h);
    let r = j.rem_floor(h);

    let mut result = q + Integer::from(&r * two_pow_n) + k;

    // The additive combination can overshoot into [0, 2N) due to the +1
    // carry possibility described in spec.md §4.2; loop the subtraction
    // defensively even though at most one is ever expected in practice.
    while result >= *modulus {
        result -= modulus;
    }
    while result < 0 {
        result += modulus;
    }
    result
}
