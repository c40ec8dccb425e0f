//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Counterexample-guided synthesis of Lyapunov functions and barrier certificates.\n\n\
    Typical use:\n  \
    1. certus list\n  \
    2. certus run linear2d\n  \
    3. certus run barr1 --format json --out barr1.json\n\n\
    Use --config to override engine options from a JSON file.\n\n\
    barr3 is a hard benchmark: expect it to exhaust its iteration budget or\n\
    hit --timeout unless the options are tuned.";

#[derive(Parser)]
#[command(name = "certus")]
#[command(about = "Synthesise stability and safety certificates for dynamical systems")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// More log output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub(crate) quiet: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List the built-in benchmarks
    List {
        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run synthesis on a built-in benchmark
    Run {
        /// Benchmark name (see `certus list`)
        benchmark: String,

        /// Decision procedure: interval | z3 | cvc5
        #[arg(long)]
        backend: Option<String>,

        /// Maximum learner/verifier cycles
        #[arg(long)]
        max_iters: Option<usize>,

        /// Random seed of the first run
        #[arg(long)]
        seed: Option<u64>,

        /// Wall-clock timeout per run in seconds (0 disables)
        #[arg(long)]
        timeout: Option<u64>,

        /// JSON file with engine option overrides
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of independent runs, with consecutive seeds
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Execute repeated runs on separate threads
        #[arg(long, default_value_t = false)]
        concurrent: bool,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,

        /// Also write the report to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Default log filter for the verbosity flags; `RUST_LOG` wins when set.
pub(crate) fn default_log_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
