//! # verify_script — external self-checking script emission
//!
//! Emits a small, dependency-free PARI/GP script that reconstructs
//! `N = h*2^n - 1` from its own text and re-derives the primality verdict
//! independently of this process, so a result can be checked without
//! trusting this binary or its checkpoint files.
//!
//! **Grounding**: generalizes the teacher's `verify::reconstruct_candidate`
//! family (one parser per form, each rebuilding an `Integer` from a stored
//! expression string) to the inverse direction needed here — *emitting* a
//! reconstructible expression rather than parsing one back — since this
//! crate has exactly one form (`h*2^n-1`) and no stored expression to
//! parse.

use std::fmt::Write as _;

use rug::Integer;

use crate::driver::Verdict;

/// Build a self-contained PARI/GP script that:
///  1. reconstructs `N` from `h` and `n`,
///  2. runs `ispseudoprime(N)` (a BPSW-style probable-prime test,
///     algorithmically independent of the Lucas sequence this crate uses),
///  3. prints `MATCH` or `MISMATCH` against the claimed verdict.
///
/// Never executed by this crate — written to disk for a human or CI job to
/// run against an independent PARI/GP installation.
pub fn render(h: &Integer, n: u64, claimed: Verdict) -> String {
    let mut out = String::new();
    let expected = match claimed {
        Verdict::Prime => "1",
        Verdict::Composite => "0",
    };
    let _ = writeln!(out, "\\\\ generated verifier script, independent of the llr test engine");
    let _ = writeln!(out, "h = {h};");
    let _ = writeln!(out, "n = {n};");
    let _ = writeln!(out, "N = h * 2^n - 1;");
    let _ = writeln!(out, "claimed = {expected};");
    let _ = writeln!(out, "actual = ispseudoprime(N);");
    let _ = writeln!(
        out,
        "if(actual == claimed, print(\"MATCH\"), print(\"MISMATCH: claimed=\", claimed, \" actual=\", actual));"
    );
    out
}
