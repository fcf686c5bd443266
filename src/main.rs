use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dex2class::config::Config;
use dex2class::driver::{ConversionSummary, Converter};
use dex2class::handler::CollectingErrorHandler;
use dex2class::output::open_sink;
use dex2class::report::{ReportStats, build_report, write_report};
use dex2class::telemetry::{Telemetry, init_logging};

/// CLI arguments for dex2class execution.
#[derive(Parser, Debug)]
#[command(
    name = "dex2class",
    about = "Translate decoded Dalvik bytecode into JVM class files.",
    version
)]
struct Cli {
    /// Decoded dex documents (JSON).
    #[arg(long, value_name = "PATH", required = true, num_args = 1..)]
    input: Vec<PathBuf>,
    /// Output directory, or a `.jar`/`.zip` archive.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Write a SARIF report of conversion failures (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// OTLP HTTP endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    /// Emit debug attributes such as `SourceFile`.
    #[arg(long)]
    debug_info: bool,
    #[arg(long)]
    skip_code: bool,
    /// With `--skip-code`, drop static initializers too.
    #[arg(long)]
    skip_static_initializers: bool,
    #[arg(long)]
    skip_exceptions: bool,
    #[arg(long)]
    reuse_register_slots: bool,
    #[arg(long)]
    topological_reorder: bool,
    /// Keep monitor instructions as they are instead of adding release handlers.
    #[arg(long)]
    no_optimize_synchronized: bool,
    /// Log the final intermediate form of every method.
    #[arg(long)]
    print_ir: bool,
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            skip_debug_info: !self.debug_info,
            skip_code: self.skip_code,
            keep_static_initializers: !self.skip_static_initializers,
            skip_exceptions: self.skip_exceptions,
            reuse_register_slots: self.reuse_register_slots,
            topological_reorder: self.topological_reorder,
            optimize_synchronized: !self.no_optimize_synchronized,
            print_ir: self.print_ir,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    for input in &cli.input {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    let telemetry = cli
        .otel
        .clone()
        .map(Telemetry::new)
        .transpose()?
        .map(Arc::new);

    let started_at = Instant::now();
    let errors = Arc::new(CollectingErrorHandler::new());
    let converter = Converter::new(cli.config())
        .with_error_handler(errors.clone())
        .with_telemetry(telemetry.clone());
    let mut sink = open_sink(&cli.output)?;
    let mut summary = ConversionSummary::default();
    let mut outcome = Ok(());
    for input in &cli.input {
        match converter.convert_file(input, sink.as_mut()) {
            Ok(file_summary) => summary.merge(file_summary),
            Err(error) => {
                outcome = Err(error);
                break;
            }
        }
    }
    sink.finish()
        .with_context(|| format!("failed to finish {}", cli.output.display()))?;

    if let Some(report) = &cli.report {
        let stats = ReportStats {
            duration_ms: started_at.elapsed().as_millis(),
            summary,
        };
        let sarif = build_report(&errors.failures(), &stats, outcome.is_ok());
        write_report(report, &sarif)?;
    }
    info!(
        classes = summary.classes,
        failed_classes = summary.failed_classes,
        failed_methods = summary.failed_methods,
        failed_files = summary.failed_files,
        total_ms = started_at.elapsed().as_millis() as u64,
        "done"
    );
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::parse_from([
            "dex2class",
            "--input",
            "a.json",
            "--output",
            "out",
            "--skip-code",
            "--no-optimize-synchronized",
            "--reuse-register-slots",
        ]);
        let config = cli.config();
        assert!(config.skip_code);
        assert!(config.keep_static_initializers);
        assert!(!config.optimize_synchronized);
        assert!(config.reuse_register_slots);
        assert!(config.skip_debug_info);
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cli = Cli::parse_from(["dex2class", "--input", "a.json", "--output", "out"]);
        assert_eq!(cli.config(), Config::default());
    }
}
