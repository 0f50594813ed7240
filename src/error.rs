//! # Error taxonomy
//!
//! One variant per failure mode in the exit-status contract. `main` matches
//! on this enum exactly once to pick a process exit code; everywhere else
//! in the library these propagate through `anyhow::Result` the way the
//! rest of the crate does, and get downcast back to `LlrError` only at the
//! binary boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code 3 is reserved and never produced by this crate.
#[derive(Debug, Error)]
pub enum LlrError {
    #[error("argument error: {0}")]
    Argument(String),

    /// After normalization, h is zero or h >= 2^n: N cannot be tested by this method.
    #[error("{h} * 2^{n} - 1 cannot be tested by this method (h >= 2^n after normalization)")]
    Domain { h: rug::Integer, n: u64 },

    /// Checkpoint directory missing or otherwise inaccessible.
    #[error("checkpoint directory inaccessible: {path}: {reason}")]
    CheckpointInaccessible { path: PathBuf, reason: String },

    /// Checkpoint directory locked by another process.
    #[error("checkpoint directory locked by another process: {path}")]
    Locked { path: PathBuf },

    /// Checkpoint set could not be parsed, or disagreed with caller-supplied (h, n).
    #[error("cannot restore from checkpoint directory {path}: {reason}")]
    CannotRestore { path: PathBuf, reason: String },

    /// Caught a termination signal mid-run; checkpoint written, exiting gracefully.
    #[error("terminated by signal after checkpointing at term {i}")]
    TerminatedBySignal { i: u64 },

    /// A write or rename failed in a way that indicates a bug or a full disk.
    #[error("internal checkpoint I/O failure: {0}")]
    CheckpointIo(String),

    /// A precondition was violated (programmer error, not an operational state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl LlrError {
    /// Stable exit code per the external-interface contract (spec.md §6 / §7).
    pub fn exit_code(&self) -> i32 {
        match self {
            LlrError::Argument(_) => 9,
            LlrError::Domain { .. } => 2,
            LlrError::CheckpointInaccessible { .. } => 4,
            LlrError::Locked { .. } => 5,
            LlrError::CannotRestore { .. } => 6,
            LlrError::TerminatedBySignal { .. } => 7,
            LlrError::CheckpointIo(_) => 10,
            LlrError::Internal(_) => 11,
        }
    }
}
