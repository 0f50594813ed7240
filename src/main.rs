//! # llr — entry point
//!
//! Parses arguments, installs signal handlers and logging, runs (or
//! resumes) the test, and maps the outcome to the process exit code
//! contract: 0=prime, 1=composite, 2=domain error, 4=checkpoint dir
//! inaccessible, 5=locked, 6=cannot restore, 7=terminated by signal,
//! 9=argument error, >=10=internal.

use std::io::Write;

use clap::Parser;
use tracing::{error, info};

use llr::cli::Cli;
use llr::driver::{self, RunOptions, RunOutcome, Verdict};
use llr::error::LlrError;
use llr::session;
use llr::stats::PrimeStats;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .init();

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "llr failed");
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: &Cli) -> Result<i32, LlrError> {
    let flags = session::install();

    let opts = RunOptions {
        checkpoint_dir: cli.checkpoint_dir.clone(),
        force_reinitialize: cli.force_reinitialize,
        checkpoint_interval_secs: cli.checkpoint_interval,
        checkpoint_multiple: cli.checkpoint_every,
        error_check_interval: cli.error_check_interval,
    };

    let (outcome, h, n) = if cli.resume {
        driver::resume(&opts, flags)?
    } else {
        let candidate = cli.candidate()?;
        let outcome = driver::run(candidate.h.clone(), candidate.n, &opts, flags)?;
        (outcome, candidate.h, candidate.n)
    };

    match outcome {
        RunOutcome::Done { verdict, stats } => {
            report_verdict(cli, &h, n, verdict);
            report_stats(cli, &stats);
            match verdict {
                Verdict::Prime => {
                    info!(%h, n, "PRIME");
                    Ok(0)
                }
                Verdict::Composite => {
                    info!(%h, n, "COMPOSITE");
                    Ok(1)
                }
            }
        }
        RunOutcome::Interrupted { i } => Err(LlrError::TerminatedBySignal { i }),
    }
}

/// Stdout contract (spec.md §6): either the plain `h * 2 ^ n - 1 is
/// prime`/`composite` line, or — with `--emit-verifier-script` — a
/// self-checking PARI/GP script in its place. Flushed immediately; this is
/// the one piece of output this crate guarantees to a caller parsing stdout.
fn report_verdict(cli: &Cli, h: &rug::Integer, n: u64, verdict: Verdict) {
    let mut stdout = std::io::stdout();
    if cli.emit_verifier_script {
        let script = llr::verify_script::render(h, n, verdict);
        let _ = write!(stdout, "{script}");
    } else {
        let word = match verdict {
            Verdict::Prime => "prime",
            Verdict::Composite => "composite",
        };
        let _ = writeln!(stdout, "{h} * 2 ^ {n} - 1 is {word}");
    }
    let _ = stdout.flush();
}

/// `--write-total-stats` / `--write-extended-stats` (spec.md §6): a
/// structured PrimeStats dump on stderr, gated behind the respective flag.
/// Extended takes precedence if both are set.
fn report_stats(cli: &Cli, stats: &PrimeStats) {
    if cli.write_extended_stats {
        eprintln!("{}", stats.dump_extended());
    } else if cli.write_total_stats {
        eprintln!("{}", stats.dump_total());
    }
}
