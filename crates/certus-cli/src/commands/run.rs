// Command handler for: Run
//
// Resolves options (benchmark defaults, then the JSON file, then flags),
// runs one or more seeds and renders the results.

use std::fs;
use std::path::PathBuf;

use certus_engine::{solve, CegisConfig, CegisError, CegisOptions, CegisResult};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::info;

use super::helpers::{parse_output_format, write_artifact, OutputFormat};
use crate::benchmarks::{self, Problem};

pub(crate) struct RunArgs {
    pub(crate) benchmark: String,
    pub(crate) backend: Option<String>,
    pub(crate) max_iters: Option<usize>,
    pub(crate) seed: Option<u64>,
    pub(crate) timeout: Option<u64>,
    pub(crate) config: Option<PathBuf>,
    pub(crate) repeat: usize,
    pub(crate) concurrent: bool,
    pub(crate) format: String,
    pub(crate) out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RunRecord {
    pub(crate) seed: u64,
    #[serde(flatten)]
    pub(crate) result: CegisResult,
}

#[derive(Debug, Serialize)]
pub(crate) struct RunReport {
    pub(crate) benchmark: String,
    pub(crate) backend: String,
    pub(crate) successes: usize,
    pub(crate) runs: Vec<RunRecord>,
}

impl RunReport {
    pub(crate) fn all_succeeded(&self) -> bool {
        self.successes == self.runs.len()
    }
}

/// Merge the keys of a JSON object over `base`. Unknown keys are rejected.
pub(crate) fn apply_overrides(base: &CegisOptions, text: &str) -> miette::Result<CegisOptions> {
    let mut merged = serde_json::to_value(base).into_diagnostic()?;
    let overrides: serde_json::Value = serde_json::from_str(text).into_diagnostic()?;
    let (serde_json::Value::Object(target), serde_json::Value::Object(source)) =
        (&mut merged, overrides)
    else {
        return Err(miette::miette!(
            "configuration file must contain a JSON object"
        ));
    };
    target.extend(source);
    CegisOptions::from_json(&merged.to_string()).into_diagnostic()
}

fn resolve_options(base: &CegisOptions, args: &RunArgs) -> miette::Result<CegisOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| miette::miette!("Failed to read {}: {e}", path.display()))?;
            apply_overrides(base, &text)?
        }
        None => base.clone(),
    };
    if let Some(backend) = &args.backend {
        options.backend = backend.parse().map_err(|e: String| miette::miette!("{e}"))?;
    }
    if let Some(max_iters) = args.max_iters {
        options.max_iters = max_iters;
    }
    if let Some(seed) = args.seed {
        options.seed = seed;
    }
    if let Some(timeout) = args.timeout {
        options.timeout_secs = timeout;
    }
    Ok(options)
}

fn run_seed(problem: &Problem, config: &CegisConfig, seed: u64) -> Result<RunRecord, CegisError> {
    let config = config.with_seed(seed);
    let result = solve(&problem.model, &problem.domains, &config)?;
    Ok(RunRecord { seed, result })
}

/// Independent runs share only the read-only problem.
fn run_seeds(
    problem: &Problem,
    config: &CegisConfig,
    seeds: &[u64],
    concurrent: bool,
) -> Result<Vec<RunRecord>, CegisError> {
    if !concurrent || seeds.len() < 2 {
        return seeds.iter().map(|&s| run_seed(problem, config, s)).collect();
    }
    std::thread::scope(|scope| {
        let handles: Vec<_> = seeds
            .iter()
            .map(|&seed| scope.spawn(move || run_seed(problem, config, seed)))
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(record) => record,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

pub(crate) fn render_report(report: &RunReport, format: OutputFormat) -> miette::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).into_diagnostic(),
        OutputFormat::Text => {
            let mut sections: Vec<String> = report
                .runs
                .iter()
                .map(|run| {
                    format!(
                        "== {} (seed {}, backend {}) ==\n{}",
                        report.benchmark, run.seed, report.backend, run.result
                    )
                })
                .collect();
            if report.runs.len() > 1 {
                sections.push(format!(
                    "{}/{} runs found a certificate",
                    report.successes,
                    report.runs.len()
                ));
            }
            Ok(sections.join("\n\n"))
        }
    }
}

/// Returns whether every run found a certificate.
pub(crate) fn run_command(args: RunArgs) -> miette::Result<bool> {
    let format = parse_output_format(&args.format)?;
    let benchmark = benchmarks::find(&args.benchmark).ok_or_else(|| {
        miette::miette!(
            "Unknown benchmark: {}. Use `certus list` to see the available ones.",
            args.benchmark
        )
    })?;
    let problem = benchmark.build()?;
    let options = resolve_options(&problem.options, &args)?;
    let config = CegisConfig::new(options).into_diagnostic()?;

    let first = config.options().seed;
    let seeds: Vec<u64> = (0..args.repeat.max(1) as u64)
        .map(|i| first.wrapping_add(i))
        .collect();
    info!(
        benchmark = benchmark.name,
        runs = seeds.len(),
        concurrent = args.concurrent,
        "running benchmark"
    );
    let runs = run_seeds(&problem, &config, &seeds, args.concurrent).into_diagnostic()?;

    let report = RunReport {
        benchmark: benchmark.name.to_string(),
        backend: config.options().backend.to_string(),
        successes: runs.iter().filter(|r| r.result.is_success()).count(),
        runs,
    };
    let rendered = render_report(&report, format)?;
    println!("{rendered}");
    if let Some(path) = &args.out {
        write_artifact(path, &rendered)?;
    }
    Ok(report.all_succeeded())
}
