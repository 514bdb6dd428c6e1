//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch PDFs for a list of DOIs from several sources with retries and fallback.
///
/// DOIs are read from positional arguments, from `--input`, or from piped
/// stdin. Each input line is either a DOI or `DOI<TAB>title`; doi.org URLs
/// and `doi:` prefixes are accepted.
#[derive(Parser, Debug)]
#[command(name = "paperfetch")]
#[command(author, version, about)]
pub struct Args {
    /// DOIs to acquire
    #[arg(value_name = "DOI")]
    pub dois: Vec<String>,

    /// Read DOIs from a file, one per line
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Directory artifacts are written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Identifiers processed concurrently (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Wall-clock budget per identifier in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub deadline: Option<u64>,

    /// Attempts per source, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Config file (default: $XDG_CONFIG_HOME/paperfetch/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the batch report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Contact address sent to Crossref, NCBI and Europe PMC
    #[arg(long, value_name = "EMAIL")]
    pub mailto: Option<String>,

    /// Relay mirror base URL (repeatable)
    #[arg(long = "mirror", value_name = "URL")]
    pub mirrors: Vec<String>,

    /// Enable the headless-browser source
    #[arg(long)]
    pub browser: bool,

    /// Reuse artifacts already present in the output directory
    #[arg(long)]
    pub skip_existing: bool,

    /// Skip open-access classification; use the configured source order as-is
    #[arg(long)]
    pub no_classify: bool,

    /// Disable per-host rate limiting
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
