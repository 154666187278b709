//! RowPulse - table growth metrics
//!
//! A batch job, meant to be run from a scheduler. Each invocation:
//! - samples auto-increment watermarks and approximate row counts from the
//!   configured MySQL and PostgreSQL tables
//! - diffs them against the counts saved by the previous invocation
//! - publishes each delta as a CloudWatch metric
//! - saves the new counts for next time

mod collector;
mod config;
mod db;
mod error;
mod pipeline;
mod publisher;
mod snapshot;

use crate::collector::DatabaseCollector;
use crate::config::Settings;
use crate::pipeline::{Orchestrator, RunReport};
use crate::publisher::CloudWatchSink;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sample table counters and publish the change since the last run
#[derive(Debug, Parser)]
#[command(name = "rowpulse", version, about)]
struct Cli {
    /// Path to the configuration YAML file
    #[arg(short, long, env = "ROWPULSE_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Collect and diff, but do not publish metrics or save snapshots
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for structured logging
    init_tracing(cli.log_format);

    match run(&cli).await {
        Ok(report) => {
            log_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("FATAL: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<RunReport> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load application config {}", cli.config.display()))?;
    info!(
        "Configuration loaded: {} databases, snapshots at {}",
        settings.targets.len(),
        settings.count_path.display()
    );

    let sink = CloudWatchSink::connect(&settings.publisher).await;
    let orchestrator =
        Orchestrator::new(&settings, DatabaseCollector::new(), sink).dry_run(cli.dry_run);

    Ok(orchestrator.run().await?)
}

fn log_report(report: &RunReport) {
    let elapsed = report.finished_at - report.started_at;
    if !report.skipped.is_empty() {
        warn!("Skipped databases: {}", report.skipped.join(", "));
    }
    if !report.saved {
        info!("Snapshots were not saved");
    }
    match &report.published {
        Some(published) => info!(
            "Run complete in {}ms: {} databases collected, {} diffed, {} metrics sent, {} failed",
            elapsed.num_milliseconds(),
            report.collected.len(),
            report.deltas.len(),
            published.sent,
            published.failed
        ),
        None if report.first_run => info!(
            "Run complete in {}ms: baseline recorded for {} databases",
            elapsed.num_milliseconds(),
            report.collected.len()
        ),
        None => info!(
            "Run complete in {}ms: {} databases collected, {} diffed, nothing published",
            elapsed.num_milliseconds(),
            report.collected.len(),
            report.deltas.len()
        ),
    }
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aws_config=warn,aws_smithy_runtime=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
    }
}
