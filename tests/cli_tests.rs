//! CLI integration tests for the `llr` binary.
//!
//! These drive the compiled binary with `assert_cmd`, asserting on exit
//! code and stdout exactly per the end-to-end scenarios in spec.md §8: the
//! stable stdout contract (`h * 2 ^ n - 1 is prime`/`composite`) and the
//! exit-code contract (0=prime, 1=composite, 2=domain error, 5=locked,
//! 9=argument error).

use assert_cmd::Command;
use predicates::prelude::*;

fn llr() -> Command {
    Command::cargo_bin("llr").unwrap()
}

/// Scenario 1: (h=1, n=2) is a hard-coded prime case (N=3).
#[test]
fn mersenne_trivial_prime_1_2() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "2", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 * 2 ^ 2 - 1 is prime"));
}

/// Scenario 2: (h=1, n=1) is a hard-coded composite case (N=1).
#[test]
fn trivial_composite_1_1() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "1", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("1 * 2 ^ 1 - 1 is composite"));
}

/// Scenario 3: (h=1, n=4): N=15, caught by the multiple-of-3 prefilter.
#[test]
fn multiple_of_three_prefilter_composite() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "4", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("1 * 2 ^ 4 - 1 is composite"));
}

/// Scenario 4: (h=1, n=3): Mersenne N=7, a known prime.
#[test]
fn mersenne_7_is_prime() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("1 * 2 ^ 3 - 1 is prime"));
}

/// Scenario 5: (h=3, n=3): N=23, a known prime.
#[test]
fn riesel_23_is_prime() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["3", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("3 * 2 ^ 3 - 1 is prime"));
}

/// Scenario 6: (h=3, n=4): N=47, a known prime.
#[test]
fn riesel_47_is_prime() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["3", "4", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("3 * 2 ^ 4 - 1 is prime"));
}

/// A known composite Riesel candidate: h=1, n=11 -> N=2047=23*89.
#[test]
fn known_composite_2047() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "11", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("composite"));
}

/// Domain error: after even-h normalization, h ends up >= 2^n.
#[test]
fn domain_error_when_h_exceeds_2_pow_n() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1000000", "2", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(2);
}

/// Argument error: neither h nor n given, and --resume not set.
#[test]
fn missing_positional_args_is_argument_error() {
    llr().assert().code(9);
}

/// Argument error: h is zero.
#[test]
fn zero_h_is_argument_error() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["0", "5", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(9);
}

/// clap's own `--help` output is printed for a quick sanity check of the
/// argument surface; this crate's numbered exit-code contract governs
/// argument/domain/checkpoint errors, not clap's built-in help handling.
#[test]
fn help_flag_prints_usage() {
    llr()
        .arg("--help")
        .assert()
        .stdout(predicate::str::contains("Lucas-Lehmer-Riesel"));
}

/// Scenario 7 (checkpoint-resume), CLI-level half: checkpointing every
/// term along the way does not change the verdict. The signal-driven
/// interrupt-then-`--resume` half of this scenario is timing-sensitive and
/// is instead covered deterministically at the library level by
/// `driver::tests::run_resumes_after_checkpoint_matches_uninterrupted_result`,
/// which drives the restore path directly without depending on process
/// scheduling.
#[test]
fn checkpointing_every_term_does_not_change_the_verdict() {
    let ckpt_dir = tempfile::tempdir().unwrap();
    let direct_dir = tempfile::tempdir().unwrap();

    // h=3, n=61: a moderately sized Riesel candidate, cheap enough for a
    // test binary to run to completion with a checkpoint at every term.
    llr()
        .args(["3", "61", "--checkpoint-dir"])
        .arg(ckpt_dir.path())
        .args(["--checkpoint-every", "1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("3 * 2 ^ 61 - 1 is composite"));

    llr()
        .args(["3", "61", "--checkpoint-dir"])
        .arg(direct_dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("3 * 2 ^ 61 - 1 is composite"));
}

/// Scenario 8 (lock contention): a second process against a directory
/// whose lock is already held exits 5.
#[test]
fn second_process_on_locked_directory_exits_5() {
    let dir = tempfile::tempdir().unwrap();

    std::fs::create_dir_all(dir.path()).unwrap();
    let lock_path = dir.path().join("run.lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .unwrap();
    {
        use std::os::unix::io::AsRawFd;
        let rc = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, 0, "failed to acquire test lock");
    }

    llr()
        .args(["1", "61", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(5);

    drop(lock_file);
}

/// `--emit-verifier-script` replaces the plain verdict line on stdout with
/// a PARI/GP script that reconstructs the candidate independently.
#[test]
fn emit_verifier_script_writes_pari_gp_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .arg("--emit-verifier-script")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("ispseudoprime"))
        .stdout(predicate::str::contains("N = h * 2^n - 1;"));
}

/// `--write-total-stats` emits a structured resource-usage dump to stderr.
#[test]
fn write_total_stats_dumps_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .arg("--write-total-stats")
        .assert()
        .code(0)
        .stderr(predicate::str::contains("total: timestamp="));
}

/// `--force-reinitialize` clears a prior result so a second run on the
/// same directory doesn't trip over a stale terminal file.
#[test]
fn force_reinitialize_allows_rerun_on_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    llr()
        .args(["1", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .assert()
        .code(0);

    llr()
        .args(["1", "3", "--checkpoint-dir"])
        .arg(dir.path())
        .arg("--force-reinitialize")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("is prime"));
}
