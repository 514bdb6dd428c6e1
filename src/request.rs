//! Acquisition requests: one DOI plus the auxiliary metadata sources may use.
//!
//! An [`AcquisitionRequest`] is immutable once built. The DOI is normalized
//! (URL/`doi:` prefixes stripped, percent-decoded, lowercased) so that two
//! spellings of the same identifier map to the same batch key and the same
//! artifact filename.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::source::compile_static_regex;

/// Bare DOI anywhere in a line: `10.XXXX/suffix`.
static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"10\.\d{4,9}(?:\.\d+)*/[^\s<>"'\]]+"#));

/// Longest encoded DOI used verbatim as a file stem.
const MAX_PLAIN_STEM_LEN: usize = 120;

/// Encoded prefix kept in front of the digest for longer DOIs.
const HASHED_STEM_PREFIX_LEN: usize = 60;

/// Errors building an [`AcquisitionRequest`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The identifier is not a syntactically valid DOI.
    #[error("invalid DOI '{doi}': {reason}")]
    InvalidDoi {
        /// The rejected input after normalization.
        doi: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The DOI has a registrant but nothing after the slash.
    #[error("DOI '{doi}' has no suffix after '/'")]
    MissingSuffix {
        /// The rejected input after normalization.
        doi: String,
    },
}

impl RequestError {
    fn invalid(doi: &str, reason: &'static str) -> Self {
        Self::InvalidDoi {
            doi: doi.to_string(),
            reason,
        }
    }
}

/// Alternate identifiers already known for a document.
///
/// Sources use these to skip lookups (a known PMCID lets the PMC source go
/// straight to the article page).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnownIdentifiers {
    /// PubMed Central ID, always stored with its `PMC` prefix.
    pub pmcid: Option<String>,
    /// PubMed ID.
    pub pmid: Option<String>,
}

/// A single document to acquire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionRequest {
    doi: String,
    title: Option<String>,
    known: KnownIdentifiers,
}

impl AcquisitionRequest {
    /// Creates a request for `doi`, normalizing and validating it.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the input is not a valid DOI.
    pub fn new(doi: &str) -> Result<Self, RequestError> {
        let doi = validate_doi(&normalize_doi(doi))?;
        Ok(Self {
            doi,
            title: None,
            known: KnownIdentifiers::default(),
        })
    }

    /// Attaches a title for sources that can search by title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        self.title = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Attaches a known PMCID. Accepts both `PMC123` and `123`.
    #[must_use]
    pub fn with_pmcid(mut self, pmcid: impl AsRef<str>) -> Self {
        let raw = pmcid.as_ref().trim();
        let digits = raw
            .strip_prefix("PMC")
            .or_else(|| raw.strip_prefix("pmc"))
            .unwrap_or(raw);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            self.known.pmcid = Some(format!("PMC{digits}"));
        }
        self
    }

    /// Attaches a known PubMed ID.
    #[must_use]
    pub fn with_pmid(mut self, pmid: impl Into<String>) -> Self {
        let pmid = pmid.into();
        if !pmid.trim().is_empty() {
            self.known.pmid = Some(pmid.trim().to_string());
        }
        self
    }

    /// The normalized DOI. Unique key of the request within a batch.
    #[must_use]
    pub fn doi(&self) -> &str {
        &self.doi
    }

    /// Title, if the metadata supplier provided one.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Alternate identifiers.
    #[must_use]
    pub fn known(&self) -> &KnownIdentifiers {
        &self.known
    }

    /// Filename-safe, injective encoding of the DOI.
    ///
    /// Percent-encoding escapes `%` itself, so distinct DOIs never share a stem.
    /// Encodings longer than 120 bytes become a 60-byte prefix plus the
    /// SHA-256 of the full DOI; those stems are always longer than any verbatim
    /// stem, so the two forms cannot collide.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let encoded = urlencoding::encode(&self.doi);
        if encoded.len() <= MAX_PLAIN_STEM_LEN {
            return encoded.into_owned();
        }

        let digest = Sha256::digest(self.doi.as_bytes());
        let mut stem = String::with_capacity(HASHED_STEM_PREFIX_LEN + 1 + digest.len() * 2);
        // Percent-encoded output is ASCII, so any byte index is a char boundary.
        stem.push_str(&encoded[..HASHED_STEM_PREFIX_LEN]);
        stem.push('-');
        for byte in digest {
            let _ = write!(stem, "{byte:02x}");
        }
        stem
    }
}

/// Parses one input line: `DOI` or `DOI<TAB>title`.
///
/// The DOI may be written as a bare DOI, a `doi:` reference or a doi.org URL.
/// Returns `None` for blank lines and `#` comments.
///
/// # Errors
///
/// Returns [`RequestError`] when the line has content but no valid DOI.
pub fn parse_request_line(line: &str) -> Option<Result<AcquisitionRequest, RequestError>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return None;
    }

    let (id_part, title) = match line.split_once('\t') {
        Some((id, title)) => (id, Some(title)),
        None => (line, None),
    };

    let candidate = DOI_PATTERN
        .find(&normalize_doi(id_part))
        .map_or_else(|| id_part.trim().to_string(), |m| m.as_str().to_string());

    Some(AcquisitionRequest::new(&candidate).map(|request| match title {
        Some(title) => request.with_title(title),
        None => request,
    }))
}

/// Strips resolver prefixes, percent-decodes, trims and lowercases a DOI.
#[must_use]
pub fn normalize_doi(input: &str) -> String {
    let mut doi = input.trim();

    for prefix in &[
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
    ] {
        if let Some(head) = doi.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            doi = &doi[prefix.len()..];
            break;
        }
    }

    if doi.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("doi:")) {
        doi = doi[4..].trim_start();
    }

    let decoded = match urlencoding::decode(doi) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => doi.to_string(),
    };
    clean_trailing_punctuation(decoded.trim()).to_ascii_lowercase()
}

/// Removes sentence punctuation and unbalanced closing parens left by text extraction.
fn clean_trailing_punctuation(doi: &str) -> &str {
    let mut doi = doi.trim_end_matches(['.', ',', ';', ':']);
    while doi.ends_with(')') && doi.matches('(').count() < doi.matches(')').count() {
        doi = &doi[..doi.len() - 1];
    }
    doi
}

fn validate_doi(doi: &str) -> Result<String, RequestError> {
    if !doi.starts_with("10.") {
        return Err(RequestError::invalid(doi, "DOI must start with '10.'"));
    }

    let Some(slash_pos) = doi.find('/') else {
        return Err(RequestError::MissingSuffix {
            doi: doi.to_string(),
        });
    };

    let registrant = &doi[3..slash_pos];
    if registrant.is_empty() {
        return Err(RequestError::invalid(
            doi,
            "missing registrant code after '10.'",
        ));
    }

    let first_segment = registrant.split('.').next().unwrap_or("");
    if first_segment.len() < 4 || !first_segment.chars().all(|c| c.is_ascii_digit()) {
        return Err(RequestError::invalid(
            doi,
            "registrant code must have at least 4 digits",
        ));
    }

    if doi[slash_pos + 1..].trim().is_empty() {
        return Err(RequestError::MissingSuffix {
            doi: doi.to_string(),
        });
    }

    Ok(doi.to_string())
}
