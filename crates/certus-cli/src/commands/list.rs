// Command handler for: List

use serde_json::json;

use super::helpers::{parse_output_format, OutputFormat};
use crate::benchmarks::BENCHMARKS;

pub(crate) fn render_list(format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let width = BENCHMARKS.iter().map(|b| b.name.len()).max().unwrap_or(0);
            BENCHMARKS
                .iter()
                .map(|b| format!("{:<width$}  {}", b.name, b.description))
                .collect::<Vec<_>>()
                .join("\n")
        }
        OutputFormat::Json => {
            let entries: Vec<_> = BENCHMARKS
                .iter()
                .map(|b| json!({"name": b.name, "description": b.description}))
                .collect();
            serde_json::Value::Array(entries).to_string()
        }
    }
}

pub(crate) fn run_list_command(format: &str) -> miette::Result<()> {
    let format = parse_output_format(format)?;
    println!("{}", render_list(format));
    Ok(())
}
