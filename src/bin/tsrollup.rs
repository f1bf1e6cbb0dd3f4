//! Command-line front end for the measurement pipeline.
//!
//! Settings load in precedence order: defaults, config file, environment variables
//! (`TSROLLUP__*`), CLI flags. Samples are read from a JSON-lines file into an in-memory store,
//! the report is run for one resource and result rows are printed as JSON lines.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tsrollup::telemetry::tracing_event_listener;
use tsrollup::{
    query, Duration, InMemorySampleStore, PipelineConfig, ReportConfig, Resource, Sample,
    Timestamp, TsError,
};

// ---------- CLI ----------

/// Runs a measurement report over raw samples.
#[derive(Parser, Debug)]
#[command(name = "tsrollup", version, about)]
pub struct Cli {
    /// Path to pipeline config file (TOML).
    #[arg(long, env = "TSROLLUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Report definition (TOML): step, datasources, calculations, exports.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Samples as JSON lines, one sample per line.
    #[arg(long)]
    pub samples: Option<PathBuf>,

    /// Resource to query.
    #[arg(long)]
    pub resource: Option<String>,

    /// Query start in epoch seconds. Defaults to end minus the configured span.
    #[arg(long, allow_negative_numbers = true)]
    pub start: Option<i64>,

    /// Query end in epoch seconds. Defaults to now.
    #[arg(long, allow_negative_numbers = true)]
    pub end: Option<i64>,

    /// Result resolution, e.g. "1h" or "3600". Must be a multiple of the report step.
    #[arg(long)]
    pub resolution: Option<Duration>,

    /// Report counter decreases as NaN instead of wraparounds.
    #[arg(long, default_value_t = false)]
    pub nan_on_counter_wrap: bool,

    /// Load and validate config (file + env + CLI), print the effective settings, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, TsError> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if cli.nan_on_counter_wrap {
        config.nan_on_counter_wrap = true;
    }
    Ok(config)
}

fn load_samples(path: &Path) -> Result<Vec<Sample>, TsError> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = serde_json::from_str(&line).map_err(|e| {
            TsError::Decode(format!("{}:{}: {}", path.display(), lineno + 1, e))
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

fn required<'a, T>(value: &'a Option<T>, flag: &str) -> Result<&'a T, TsError> {
    value
        .as_ref()
        .ok_or_else(|| TsError::Config(format!("missing required argument --{}", flag)))
}

fn run(cli: &Cli, config: &PipelineConfig) -> Result<(), TsError> {
    let report = ReportConfig::from_file(required(&cli.report, "report")?)?;
    let descriptor = report.into_descriptor()?;
    let resource = Resource::new(required(&cli.resource, "resource")?);

    let store = InMemorySampleStore::new();
    let samples = load_samples(required(&cli.samples, "samples")?)?;
    tracing::info!(samples = samples.len(), "loaded samples");
    store.insert(samples)?;

    let results = query::select_with_defaults(
        &store,
        &resource,
        cli.start.map(Timestamp::from_epoch_seconds),
        cli.end.map(Timestamp::from_epoch_seconds),
        descriptor,
        cli.resolution,
        config.query_options(tracing_event_listener()),
        &config.query_defaults(),
    )?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in results.rows() {
        let line = serde_json::to_string(row).map_err(|e| TsError::Serialization(e.to_string()))?;
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

// ---------- Main ----------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {}", e);
            return ExitCode::from(2);
        }
    };

    if cli.validate_config {
        println!("nan_on_counter_wrap={}", config.nan_on_counter_wrap);
        println!("default_span={}", config.default_span);
        println!("resolution_divisor={}", config.resolution_divisor);
        println!("ingest_threads={}", config.ingest_threads);
        println!("ingest_queue_capacity={}", config.ingest_queue_capacity);
        return ExitCode::SUCCESS;
    }

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("query failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
