//! Assembly of acquisition requests from positional DOIs, an input file and/or stdin.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};
use paperfetch_core::request::{AcquisitionRequest, RequestError, parse_request_line};
use tracing::warn;

use crate::cli::Args;

/// Requests parsed from all inputs, plus the lines that were rejected.
#[derive(Debug, Default)]
pub(crate) struct ParsedInput {
    pub(crate) requests: Vec<AcquisitionRequest>,
    pub(crate) rejected: Vec<(String, RequestError)>,
}

/// Collects input text from arguments, `--input`, and piped stdin (only
/// read when stdin is not a terminal), and parses every line.
pub(crate) fn process_input(args: &Args) -> Result<ParsedInput> {
    let mut segments = Vec::new();
    if !args.dois.is_empty() {
        segments.push(args.dois.join("\n"));
    }

    if let Some(path) = &args.input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file '{}'", path.display()))?;
        segments.push(text);
    }

    if args.dois.is_empty() && args.input.is_none() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read DOIs from stdin")?;
        segments.push(buffer);
    }

    Ok(parse_input_text(&segments.join("\n")))
}

/// Parses newline-separated input; blank lines and `#` comments are skipped.
pub(crate) fn parse_input_text(text: &str) -> ParsedInput {
    let mut parsed = ParsedInput::default();
    for line in text.lines() {
        match parse_request_line(line) {
            Some(Ok(request)) => parsed.requests.push(request),
            Some(Err(error)) => {
                warn!(line = line.trim(), error = %error, "Skipped unrecognized input");
                parsed.rejected.push((line.trim().to_string(), error));
            }
            None => {}
        }
    }
    parsed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;

    #[test]
    fn test_parse_input_text_mixed_forms() {
        let parsed = parse_input_text(
            "# reading list\n\
             10.1000/abc\n\
             https://doi.org/10.1000/DEF\n\
             \n\
             doi:10.1000/ghi\tSome Title\n\
             not-a-doi\n",
        );
        let dois: Vec<&str> = parsed.requests.iter().map(AcquisitionRequest::doi).collect();
        assert_eq!(dois, vec!["10.1000/abc", "10.1000/def", "10.1000/ghi"]);
        assert_eq!(parsed.requests[2].title(), Some("Some Title"));
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].0, "not-a-doi");
    }

    #[test]
    fn test_process_input_reads_positional_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.1000/from-file").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args =
            Args::try_parse_from(["paperfetch", "10.1000/from-args", "--input", &path]).unwrap();
        let parsed = process_input(&args).unwrap();
        let dois: Vec<&str> = parsed.requests.iter().map(AcquisitionRequest::doi).collect();
        assert_eq!(dois, vec!["10.1000/from-args", "10.1000/from-file"]);
    }

    #[test]
    fn test_process_input_missing_file_is_error() {
        let args =
            Args::try_parse_from(["paperfetch", "--input", "/nonexistent/dois.txt"]).unwrap();
        let err = process_input(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read input file"));
    }
}
