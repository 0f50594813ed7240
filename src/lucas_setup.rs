//! # LUCAS_SETUP — V(1) search and U(2) construction
//!
//! Given normalized `(h, n)` and `N = h*2^n - 1`, derives the starting value
//! V(1) for the Lucas sequence and the initial term `U(2) = V(h) mod N`.
//!
//! **Grounding**: generalizes the teacher's `kbn::find_rodseth_v1` (a
//! 14-entry shortlist plus linear continuation from 26, specific to k
//! divisible by 3) to the spec's full 42-entry preferred list and linear
//! continuation from 167, and generalizes `kbn::lucas_v_k` (binary ladder
//! over a `u64` multiplier) to take an arbitrary-precision `h`.
//!
//! This never performs I/O and never fails operationally — its
//! preconditions (`N` odd and > 4, `h >= 1`) are guaranteed by the caller
//! (the [`crate::driver`] normalization step); a violation here is a bug,
//! not an operational error, matching spec.md §7's propagation policy.

use rug::ops::RemRounding;
use rug::Integer;

/// Preferred V(1) candidates to try (in order) before falling back to a
/// linear search from 167. Covers the overwhelming majority of h divisible
/// by 3 in a handful of Jacobi-symbol evaluations.
const PREFERRED_V1: &[u32] = &[
    3, 5, 9, 11, 15, 17, 21, 29, 27, 35, 39, 41, 31, 45, 51, 55, 49, 59, 69, 65, 71, 57, 85, 81,
    95, 99, 77, 53, 67, 125, 111, 105, 87, 129, 101, 83, 165, 155, 149, 141, 121, 109,
];

/// First candidate tried by the linear continuation once the preferred list
/// is exhausted.
const LINEAR_START: u32 = 167;

/// Select V(1) for the Lucas sequence of `N = h*2^n - 1`.
///
/// - If `h` is not a multiple of 3, returns 4 directly.
/// - If `h == 1` (Mersenne case), returns 4 (matches historical Mersenne
///   test convention, even though 3 is sometimes admissible).
/// - Otherwise searches the preferred list, then a linear continuation from
///   167 by steps of 2, for the smallest x such that
///   `Jacobi(x-2, N) = +1` and `Jacobi(x+2, N) = -1`.
pub fn gen_v1(h: &Integer, n: &Integer) -> u32 {
    if !h.is_divisible_u(3) {
        return 4;
    }
    if *h == 1u32 {
        return 4;
    }

    for &x in PREFERRED_V1 {
        if jacobi_condition(x, n) {
            return x;
        }
    }

    let mut x = LINEAR_START;
    loop {
        if jacobi_condition(x, n) {
            return x;
        }
        x += 2;
    }
}

fn jacobi_condition(x: u32, n: &Integer) -> bool {
    let xm2 = Integer::from(x) - 2u32;
    let xp2 = Integer::from(x) + 2u32;
    xm2.jacobi(n) == 1 && xp2.jacobi(n) == -1
}

/// Compute `V(h) mod N` via the left-to-right binary ladder over the bits
/// of `h`, using `V(0)=2`, `V(1)=v1`, `V(2m)=V(m)^2-2`, `V(2m+1)=V(m+1)*V(m)-V(1)`.
///
/// Maintains the pair `(r, s) = (V(m), V(m+1))`, starting at `m=1` (the
/// leading bit of `h` is always 1 and is consumed by that initialization),
/// and folds in each remaining bit from the second-highest down to bit 0.
pub fn lucas_v_h(h: &Integer, v1: u32, modulus: &Integer) -> Integer {
    if *h == 0u32 {
        return Integer::from(2u32);
    }
    if *h == 1u32 {
        return Integer::from(v1).rem_euc(modulus);
    }

    let v1_int = Integer::from(v1);
    let mut r = v1_int.clone().rem_euc(modulus); // V(1)
    let mut s = (Integer::from(&v1_int * &v1_int) - 2u32).rem_euc(modulus); // V(2)

    let bits = h.significant_bits();
    for i in (0..bits - 1).rev() {
        if h.get_bit(i) {
            // bit=1: m -> 2m+1 : r=V(2m+1), s=V(2m+2)
            r = (Integer::from(&r * &s) - &v1_int).rem_euc(modulus);
            s = (Integer::from(&s * &s) - 2u32).rem_euc(modulus);
        } else {
            // bit=0: m -> 2m : r=V(2m), s=V(2m+1)
            s = (Integer::from(&r * &s) - &v1_int).rem_euc(modulus);
            r = (Integer::from(&r * &r) - 2u32).rem_euc(modulus);
        }
    }
    r
}

/// Run the full setup: select V(1) and compute `U(2) = V(h) mod N`.
pub fn setup(h: &Integer, modulus: &Integer) -> (u32, Integer) {
    let v1 = gen_v1(h, modulus);
    let u2 = lucas_v_h(h, v1, modulus);
    (v1, u2)
}
