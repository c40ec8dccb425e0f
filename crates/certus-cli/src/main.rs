#![doc = include_str!("../README.md")]

mod benchmarks;
mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{default_log_filter, Cli, Commands};
use commands::run::RunArgs;

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter(cli.verbose, cli.quiet))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List { format } => commands::list::run_list_command(&format)?,
        Commands::Run {
            benchmark,
            backend,
            max_iters,
            seed,
            timeout,
            config,
            repeat,
            concurrent,
            format,
            out,
        } => {
            let all_succeeded = commands::run::run_command(RunArgs {
                benchmark,
                backend,
                max_iters,
                seed,
                timeout,
                config,
                repeat,
                concurrent,
                format,
                out,
            })?;
            if !all_succeeded {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::cli::{default_log_filter, Cli, Commands, CLI_LONG_ABOUT};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
        assert!(CLI_LONG_ABOUT.contains("certus run"));
        assert!(CLI_LONG_ABOUT.contains("barr3 is a hard benchmark"));
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "certus",
            "-vv",
            "run",
            "barr1",
            "--backend",
            "interval",
            "--max-iters",
            "4",
            "--repeat",
            "3",
            "--concurrent",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                benchmark,
                backend,
                max_iters,
                repeat,
                concurrent,
                format,
                seed,
                ..
            } => {
                assert_eq!(benchmark, "barr1");
                assert_eq!(backend.as_deref(), Some("interval"));
                assert_eq!(max_iters, Some(4));
                assert_eq!(repeat, 3);
                assert!(concurrent);
                assert_eq!(format, "json");
                assert_eq!(seed, None);
            }
            Commands::List { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_benchmark() {
        assert!(Cli::try_parse_from(["certus", "run"]).is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["certus", "-q", "-v", "list"]).is_err());
    }

    #[test]
    fn verbosity_maps_to_filters() {
        assert_eq!(default_log_filter(0, false), "warn");
        assert_eq!(default_log_filter(1, false), "info");
        assert_eq!(default_log_filter(5, false), "trace");
        assert_eq!(default_log_filter(0, true), "error");
    }
}
