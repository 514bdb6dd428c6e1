//! Structural checks on fetched bytes before they count as a success.
//!
//! Scraped download links frequently return an HTML error or login page with
//! a 200 status. The validator rejects anything that is not plausibly a PDF:
//! too small, too large, missing the `%PDF-` signature, or (when the
//! structural check is enabled) missing the `%%EOF` trailer.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::source::DEFAULT_MAX_ARTIFACT_BYTES;

/// Default minimum size; real PDFs are never this small.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;

const SIGNATURE: &[u8] = b"%PDF-";
const SIGNATURE_WINDOW: usize = 1024;
const TRAILER: &[u8] = b"%%EOF";
const TRAILER_WINDOW: usize = 2048;

/// Verdict on a fetched artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Validation {
    /// Accept.
    Valid,
    /// Wrong format or malformed.
    Corrupt {
        /// What check failed.
        reason: String,
    },
    /// Below the minimum size.
    TooSmall {
        /// Actual size.
        bytes: u64,
        /// Configured minimum.
        min_bytes: u64,
    },
}

impl Validation {
    /// True for [`Validation::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("valid"),
            Self::Corrupt { reason } => write!(f, "corrupt: {reason}"),
            Self::TooSmall { bytes, min_bytes } => {
                write!(f, "too small: {bytes} bytes (minimum {min_bytes})")
            }
        }
    }
}

/// Validates PDF artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactValidator {
    min_bytes: u64,
    max_bytes: u64,
    structural_check: bool,
}

impl Default for ArtifactValidator {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            structural_check: true,
        }
    }
}

impl ArtifactValidator {
    /// Creates a validator with explicit thresholds.
    #[must_use]
    pub fn new(min_bytes: u64, max_bytes: u64, structural_check: bool) -> Self {
        Self {
            min_bytes,
            max_bytes: max_bytes.max(min_bytes),
            structural_check,
        }
    }

    /// Minimum accepted size.
    #[must_use]
    pub fn min_bytes(&self) -> u64 {
        self.min_bytes
    }

    /// Checks `bytes` against size bounds, signature and trailer.
    ///
    /// `declared_type` is advisory: a declared HTML type only sharpens the
    /// rejection message, and a wrong or missing type never rejects bytes
    /// that carry the signature.
    #[must_use]
    pub fn validate(&self, bytes: &[u8], declared_type: Option<&str>) -> Validation {
        let len = bytes.len() as u64;
        let verdict = if len < self.min_bytes {
            Validation::TooSmall {
                bytes: len,
                min_bytes: self.min_bytes,
            }
        } else if len > self.max_bytes {
            Validation::Corrupt {
                reason: format!("exceeds maximum size of {} bytes", self.max_bytes),
            }
        } else if !has_signature(bytes) {
            let declared_html = declared_type
                .is_some_and(|t| t.to_ascii_lowercase().contains("html"));
            Validation::Corrupt {
                reason: if declared_html || looks_like_html(bytes) {
                    "HTML page instead of PDF".to_string()
                } else {
                    "missing %PDF- signature".to_string()
                },
            }
        } else if self.structural_check && !has_trailer(bytes) {
            Validation::Corrupt {
                reason: "missing %%EOF trailer (truncated)".to_string(),
            }
        } else {
            Validation::Valid
        };

        debug!(len, ?declared_type, %verdict, "validated artifact");
        verdict
    }
}

fn has_signature(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SIGNATURE_WINDOW)];
    window
        .windows(SIGNATURE.len())
        .any(|chunk| chunk == SIGNATURE)
}

fn has_trailer(bytes: &[u8]) -> bool {
    let start = bytes.len().saturating_sub(TRAILER_WINDOW);
    bytes[start..]
        .windows(TRAILER.len())
        .any(|chunk| chunk == TRAILER)
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}
