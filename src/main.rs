//! CLI entry point for paperfetch.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use paperfetch_core::acquire::{BatchObserver, Engine};
use paperfetch_core::config::load_config;
use paperfetch_core::source::build_default_sources;
use tracing::{debug, error, info, warn};

mod app;
mod cli;

use app::config_runtime::{apply_cli_overrides, parse_cli_with_sources};
use app::exit_handler::determine_exit_outcome;
use app::input_processor::process_input;
use app::progress_manager::progress_reporter;
use app::terminal::{
    default_log_level, init_tracing, is_dumb_terminal, no_color_env_requested,
    should_use_progress_bar,
};

/// Process outcome mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every identifier succeeded, or there was nothing to do.
    Success,
    /// Some identifiers succeeded.
    Partial,
    /// Nothing succeeded, or a fatal error aborted the run.
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, cli_sources) = parse_cli_with_sources();

    let dumb_terminal = is_dumb_terminal();
    init_tracing(
        default_log_level(args.quiet, args.verbose),
        no_color_env_requested() || dumb_terminal,
    );
    debug!(?args, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "configuration loaded");
    }
    let config = apply_cli_overrides(loaded.config, &args, &cli_sources)?;

    let input = process_input(&args)?;
    if input.requests.is_empty() {
        if input.rejected.is_empty() {
            info!("No DOIs provided. Pass DOIs as arguments, with --input, or via stdin.");
            info!("Example: echo '10.1371/journal.pone.0000001' | paperfetch");
            return Ok(ProcessExit::Success);
        }
        warn!(rejected = input.rejected.len(), "No valid DOIs found in input");
        return Ok(ProcessExit::Failure);
    }
    info!(
        dois = input.requests.len(),
        skipped = input.rejected.len(),
        "Parsed input"
    );

    let sources = build_default_sources(&config.source_options());
    let progress = progress_reporter(
        should_use_progress_bar(io::stderr().is_terminal(), args.quiet, dumb_terminal),
        input.requests.len(),
    );

    let mut builder = Engine::builder(config.output_dir())
        .sources(sources)
        .classifier(config.classifier())
        .settings(config.chain_settings())
        .rate_limits(!args.no_rate_limit);
    if let Some(progress) = &progress {
        builder = builder.observer(Arc::clone(progress) as Arc<dyn BatchObserver>);
    }
    let engine = builder
        .build()
        .await
        .context("Failed to initialize acquisition engine")?;

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling outstanding work");
            cancel.cancel();
        }
    });

    let concurrency = config.concurrency()?;
    let outcome = engine.acquire_batch(input.requests, &concurrency).await;
    if let Some(progress) = &progress {
        progress.finish();
    }
    let report = outcome.context("Batch aborted")?;

    for result in report.results.iter().filter(|r| !r.success) {
        warn!(
            doi = %result.doi,
            reason = result.exhaustion.map_or("unknown", |r| r.as_str()),
            attempts = result.attempts.len(),
            "No artifact obtained"
        );
    }

    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to '{}'", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = input.rejected.len(),
        total = report.total,
        mean_ms = u64::try_from(report.mean_elapsed().as_millis()).unwrap_or(u64::MAX),
        "Acquisition complete"
    );

    Ok(determine_exit_outcome(
        report.succeeded,
        report.failed + input.rejected.len(),
    ))
}
