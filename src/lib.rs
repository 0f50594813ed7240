//! # llr — Lucas-Lehmer-Riesel primality tester
//!
//! Tests numbers of the form `N = h*2^n - 1` (Riesel candidates, with the
//! Mersenne case `h = 1` as a special case) for primality, using the Lucas
//! V-sequence and a checkpointable driver that can be interrupted and
//! resumed without re-deriving any work.
//!
//! ## Module organization
//!
//! - [`bigint`] — thin `rug::Integer` facade (Jacobi symbol, hex codec,
//!   low-bit extraction)
//! - [`stats`] — resource accounting (`getrusage`, wall clock) that
//!   survives a checkpoint/restart cycle
//! - [`lucas_setup`] — V(1) search and the initial Lucas term
//! - [`mod_engine`] — the `N`-specific shift-and-add modular reduction
//! - [`session`] — signal flags and the periodic checkpoint timer
//! - [`checkpoint`] — durable on-disk state: lock, rotation, restore
//! - [`driver`] — the end-to-end state machine tying the above together
//! - [`verify_script`] — emits an external self-check script for a result
//! - [`error`] — the error taxonomy and process exit code mapping
//! - [`cli`] — command-line argument parsing

pub mod bigint;
pub mod checkpoint;
pub mod cli;
pub mod driver;
pub mod error;
pub mod lucas_setup;
pub mod mod_engine;
pub mod session;
pub mod stats;
pub mod verify_script;
