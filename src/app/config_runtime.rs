//! Merging explicit CLI flags over file configuration.

use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use paperfetch_core::config::FileConfig;

use crate::cli::Args;

/// Which arguments were given on the command line (as opposed to defaults).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) output_dir: bool,
    pub(crate) workers: bool,
    pub(crate) deadline: bool,
    pub(crate) max_attempts: bool,
    pub(crate) mailto: bool,
    pub(crate) mirrors: bool,
    pub(crate) browser: bool,
    pub(crate) skip_existing: bool,
    pub(crate) no_classify: bool,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let command = Args::command();
    let matches = command.get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    let sources = CliValueSources {
        output_dir: is_commandline_value(&matches, "output_dir"),
        workers: is_commandline_value(&matches, "workers"),
        deadline: is_commandline_value(&matches, "deadline"),
        max_attempts: is_commandline_value(&matches, "max_attempts"),
        mailto: is_commandline_value(&matches, "mailto"),
        mirrors: is_commandline_value(&matches, "mirrors"),
        browser: is_commandline_value(&matches, "browser"),
        skip_existing: is_commandline_value(&matches, "skip_existing"),
        no_classify: is_commandline_value(&matches, "no_classify"),
    };
    (args, sources)
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Overwrites file values with flags the user passed explicitly, then
/// re-validates the merged result.
pub(crate) fn apply_cli_overrides(
    mut config: FileConfig,
    args: &Args,
    cli_sources: &CliValueSources,
) -> Result<FileConfig> {
    if cli_sources.output_dir
        && let Some(output_dir) = &args.output_dir
    {
        config.output_dir = Some(output_dir.clone());
    }

    if cli_sources.workers
        && let Some(workers) = args.workers
    {
        config.workers = Some(usize::from(workers));
    }

    if cli_sources.deadline
        && let Some(deadline) = args.deadline
    {
        config.deadline_secs = Some(deadline);
    }

    if cli_sources.max_attempts
        && let Some(max_attempts) = args.max_attempts
    {
        config.retry.max_attempts = Some(max_attempts);
    }

    if cli_sources.mailto
        && let Some(mailto) = &args.mailto
    {
        config.mailto = Some(mailto.clone());
    }

    if cli_sources.mirrors && !args.mirrors.is_empty() {
        config.mirrors = Some(args.mirrors.clone());
    }

    if cli_sources.browser && args.browser {
        config.browser = Some(true);
    }

    if cli_sources.skip_existing && args.skip_existing {
        config.skip_existing = Some(true);
    }

    if cli_sources.no_classify && args.no_classify {
        config.classify = Some(false);
    }

    config
        .validate()
        .context("Invalid effective configuration after applying command-line flags")?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;

    fn all_sources() -> CliValueSources {
        CliValueSources {
            output_dir: true,
            workers: true,
            deadline: true,
            max_attempts: true,
            mailto: true,
            mirrors: true,
            browser: true,
            skip_existing: true,
            no_classify: true,
        }
    }

    #[test]
    fn test_file_values_kept_when_flags_absent() {
        let args = Args::try_parse_from(["paperfetch"]).unwrap();
        let config = FileConfig {
            workers: Some(12),
            skip_existing: Some(true),
            ..FileConfig::default()
        };
        let merged = apply_cli_overrides(config, &args, &CliValueSources::default()).unwrap();
        assert_eq!(merged.workers, Some(12));
        assert_eq!(merged.skip_existing, Some(true));
    }

    #[test]
    fn test_explicit_flags_override_file_values() {
        let args = Args::try_parse_from([
            "paperfetch",
            "-o",
            "out",
            "-w",
            "3",
            "--deadline",
            "30",
            "-r",
            "2",
            "--mailto",
            "me@example.org",
            "--mirror",
            "https://m.test",
            "--browser",
            "--skip-existing",
            "--no-classify",
        ])
        .unwrap();
        let config = FileConfig {
            workers: Some(12),
            output_dir: Some(PathBuf::from("from-file")),
            ..FileConfig::default()
        };
        let merged = apply_cli_overrides(config, &args, &all_sources()).unwrap();
        assert_eq!(merged.output_dir, Some(PathBuf::from("out")));
        assert_eq!(merged.workers, Some(3));
        assert_eq!(merged.deadline_secs, Some(30));
        assert_eq!(merged.retry.max_attempts, Some(2));
        assert_eq!(merged.mailto.as_deref(), Some("me@example.org"));
        assert_eq!(merged.mirrors, Some(vec!["https://m.test".to_string()]));
        assert_eq!(merged.browser, Some(true));
        assert_eq!(merged.skip_existing, Some(true));
        assert_eq!(merged.classify, Some(false));
    }

    #[test]
    fn test_invalid_flag_value_rejected_after_merge() {
        let args =
            Args::try_parse_from(["paperfetch", "--mirror", "not a url"]).unwrap();
        let err = apply_cli_overrides(FileConfig::default(), &args, &all_sources()).unwrap_err();
        assert!(format!("{err:#}").contains("mirrors"));
    }
}
