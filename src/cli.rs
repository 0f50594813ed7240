//! # CLI front end — argument parsing
//!
//! Mirrors the teacher's `#[derive(Parser)]` struct-of-flags shape (global
//! options on one struct, no subcommands needed here since this crate
//! tests exactly one candidate per invocation).

use std::path::PathBuf;

use clap::Parser;
use rug::Integer;

use crate::error::LlrError;

/// Test `N = h * 2^n - 1` for primality via Lucas-Lehmer-Riesel, with
/// durable checkpoint/restart.
#[derive(Parser, Debug)]
#[command(
    name = "llr",
    version,
    about = "Lucas-Lehmer-Riesel primality tester for N = h*2^n - 1"
)]
pub struct Cli {
    /// Multiplier h (decimal). Required unless --resume is set.
    ///
    /// Deliberately not marked `required_unless_present` at the clap level:
    /// a missing positional there would exit via clap's own default exit
    /// code (2), colliding with this crate's own exit-code-2 ("domain
    /// error") meaning. [`Cli::candidate`] validates presence instead, so
    /// every argument error — including a missing positional — routes
    /// through [`LlrError::Argument`] and exit code 9 (spec.md §6/§7).
    pub h: Option<String>,

    /// Exponent n. Required unless --resume is set (see [`Cli::h`]).
    pub n: Option<u64>,

    /// Directory holding checkpoint, lock, and result files.
    #[arg(long, default_value = "llr-checkpoint", env = "LLR_CHECKPOINT_DIR")]
    pub checkpoint_dir: PathBuf,

    /// Resume the test already in progress in --checkpoint-dir, ignoring h/n.
    #[arg(long)]
    pub resume: bool,

    /// Remove any existing checkpoint/result state in --checkpoint-dir
    /// before starting (does not remove sav.near/sav.n-1/sav.end snapshots).
    #[arg(long)]
    pub force_reinitialize: bool,

    /// Seconds between periodic checkpoints via a virtual-time alarm.
    /// 0 disables the timer (checkpointing then relies only on the fixed
    /// i=2/near-end/n-1/n triggers and --checkpoint-every).
    #[arg(long, default_value_t = 300)]
    pub checkpoint_interval: i64,

    /// Additionally checkpoint every this many terms (0 disables).
    #[arg(long, default_value_t = 0)]
    pub checkpoint_every: u64,

    /// Instead of the plain prime/composite line, print a self-checking
    /// PARI/GP verifier script to stdout.
    #[arg(long)]
    pub emit_verifier_script: bool,

    /// Dump the total (restored + this run's delta) resource-usage stats
    /// to stderr after the test completes.
    #[arg(long)]
    pub write_total_stats: bool,

    /// Dump the full begin-of-run/current/restored/total stats breakdown
    /// to stderr after the test completes.
    #[arg(long)]
    pub write_extended_stats: bool,

    /// Terms between independent residue recomputation checks (Gerbicz-
    /// style); 0 disables the check.
    #[arg(long, default_value_t = 0)]
    pub error_check_interval: u64,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parsed and validated `(h, n)`, once `--resume` has been ruled out.
pub struct Candidate {
    pub h: Integer,
    pub n: u64,
}

impl Cli {
    pub fn candidate(&self) -> Result<Candidate, LlrError> {
        let h_str = self
            .h
            .as_deref()
            .ok_or_else(|| LlrError::Argument("h is required unless --resume is set".to_string()))?;
        let n = self
            .n
            .ok_or_else(|| LlrError::Argument("n is required unless --resume is set".to_string()))?;
        let h = Integer::from_str_radix(h_str, 10)
            .map_err(|e| LlrError::Argument(format!("invalid h {h_str:?}: {e}")))?;
        if h < 1 {
            return Err(LlrError::Argument("h must be >= 1".to_string()));
        }
        if n == 0 {
            return Err(LlrError::Argument("n must be >= 1".to_string()));
        }
        Ok(Candidate { h, n })
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
