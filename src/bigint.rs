//! # BIGINT — arbitrary-precision integer helpers
//!
//! A thin facade over `rug::Integer` (GMP bindings). `rug` already supplies
//! add/sub/mul/compare, shifts, Jacobi symbols and truncated division; this
//! module only adds the handful of conventions this crate needs repeatedly:
//! hex (de)serialization for checkpoint records, and low-n-bit extraction
//! for the shift-and-add reduction in [`crate::mod_engine`].

use anyhow::{anyhow, Result};
use rug::Integer;

/// Jacobi symbol (a/n), n odd. Thin wrapper so call sites read `bigint::jacobi`
/// next to the rest of this module instead of reaching into `rug` directly.
pub fn jacobi(a: &Integer, n: &Integer) -> i32 {
    a.jacobi(n)
}

/// Serialize a non-negative integer as lowercase hex, no leading `0x`, no sign.
/// Zero serializes as `"0"`.
pub fn to_hex(value: &Integer) -> String {
    value.to_string_radix(16)
}

/// Parse a hex string (as emitted by [`to_hex`], optionally prefixed `0x`)
/// into a non-negative integer.
pub fn from_hex(s: &str) -> Result<Integer> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Err(anyhow!("empty hex string"));
    }
    Integer::from_str_radix(s, 16).map_err(|e| anyhow!("invalid hex u_term {:?}: {}", s, e))
}

/// Extract the low `bits` bits of `value` as a new integer: `value mod 2^bits`.
pub fn low_bits(value: &Integer, bits: u32) -> Integer {
    let mut k = value.clone();
    k.keep_bits_mut(bits);
    k
}
