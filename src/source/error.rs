//! Typed failures reported by source adapters and their retry classification.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// A single failed attempt against one source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source has no artifact for this identifier.
    #[error("not found: {detail}")]
    NotFound {
        /// What was looked up and where.
        detail: String,
    },

    /// Connection, DNS, TLS or body-read failure.
    #[error("network error fetching {url}: {detail}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// Rendered underlying error.
        detail: String,
    },

    /// Non-success HTTP response that is not a plain not-found.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL being fetched.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The source asked us to slow down (HTTP 429).
    #[error("rate limited by {url}")]
    RateLimited {
        /// The URL that answered 429.
        url: String,
        /// Server-mandated delay from `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The source cannot handle this identifier at all.
    #[error("unsupported identifier: {detail}")]
    Unsupported {
        /// Why the source declined.
        detail: String,
    },

    /// The attempt did not finish within its time budget.
    #[error("timed out: {detail}")]
    Timeout {
        /// What was being waited on.
        detail: String,
    },

    /// The batch was cancelled while the attempt was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    /// Creates a not-found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
        }
    }

    /// Creates a network error from any displayable cause.
    pub fn network(url: impl Into<String>, cause: impl Display) -> Self {
        Self::Network {
            url: url.into(),
            detail: cause.to_string(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a rate-limited error.
    pub fn rate_limited(url: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            url: url.into(),
            retry_after,
        }
    }

    /// Creates an unsupported-identifier error.
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported {
            detail: detail.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Timeout {
            detail: detail.into(),
        }
    }

    /// Maps a reqwest failure for `url` onto a timeout or network error.
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(format!("request to {url}"))
        } else {
            Self::network(url, error)
        }
    }

    /// Server-mandated delay carried by a rate-limit failure.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Outcome kind recorded in the attempt trail for this failure.
    #[must_use]
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::NotFound { .. } => AttemptOutcome::NotFound,
            Self::Network { .. } => AttemptOutcome::NetworkError,
            Self::HttpStatus { status, .. } => match classify_http_status(*status) {
                FailureType::Transient if *status == 408 => AttemptOutcome::Timeout,
                FailureType::Transient => AttemptOutcome::NetworkError,
                FailureType::RateLimited => AttemptOutcome::RateLimited,
                FailureType::Terminal if matches!(status, 404 | 410) => AttemptOutcome::NotFound,
                FailureType::Terminal => AttemptOutcome::Rejected,
            },
            Self::RateLimited { .. } => AttemptOutcome::RateLimited,
            Self::Unsupported { .. } => AttemptOutcome::Unsupported,
            Self::Timeout { .. } => AttemptOutcome::Timeout,
            Self::Cancelled => AttemptOutcome::Cancelled,
        }
    }
}

/// Outcome kind of one attempt, as stored in an `AttemptRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Bytes fetched and accepted by the validator.
    Success,
    /// Source has no artifact for the identifier.
    NotFound,
    /// Connection-level or 5xx failure.
    NetworkError,
    /// Source answered 429.
    RateLimited,
    /// Source refused the request (400/401/403 and similar).
    Rejected,
    /// Source cannot handle the identifier.
    Unsupported,
    /// Bytes fetched but rejected by the validator.
    ValidationError,
    /// Attempt exceeded its time budget.
    Timeout,
    /// Batch cancelled during the attempt.
    Cancelled,
}

impl AttemptOutcome {
    /// Stable snake_case label used in logs and histograms.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::Rejected => "rejected",
            Self::Unsupported => "unsupported",
            Self::ValidationError => "validation_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry against the same source.
    Transient,
    /// Source is throttling; retry after backoff or `Retry-After`.
    RateLimited,
    /// Retrying this source is pointless; advance the chain.
    Terminal,
}

/// Classifies a source failure for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network | Transient (TLS/certificate problems are Terminal) |
/// | Timeout | Transient |
/// | RateLimited | RateLimited |
/// | HttpStatus | see [`classify_http_status`] |
/// | NotFound, Unsupported, Cancelled | Terminal |
#[must_use]
#[instrument(level = "trace")]
pub fn classify_error(error: &SourceError) -> FailureType {
    match error {
        SourceError::Network { detail, .. } => {
            if is_tls_error(detail) {
                FailureType::Terminal
            } else {
                FailureType::Transient
            }
        }
        SourceError::Timeout { .. } => FailureType::Transient,
        SourceError::RateLimited { .. } => FailureType::RateLimited,
        SourceError::HttpStatus { status, .. } => classify_http_status(*status),
        SourceError::NotFound { .. } | SourceError::Unsupported { .. } | SourceError::Cancelled => {
            FailureType::Terminal
        }
    }
}

/// Classifies an HTTP status code.
///
/// | Status | Type |
/// |--------|------|
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | 5xx | Transient |
/// | other 4xx | Terminal |
#[allow(clippy::match_same_arms)]
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        400..=499 => FailureType::Terminal,
        500..=599 => FailureType::Transient,
        _ => FailureType::Terminal,
    }
}

fn is_tls_error(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    detail.contains("certificate") || detail.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_http_status_table() {
        assert_eq!(classify_http_status(404), FailureType::Terminal);
        assert_eq!(classify_http_status(403), FailureType::Terminal);
        assert_eq!(classify_http_status(408), FailureType::Transient);
        assert_eq!(classify_http_status(429), FailureType::RateLimited);
        assert_eq!(classify_http_status(500), FailureType::Transient);
        assert_eq!(classify_http_status(503), FailureType::Transient);
        assert_eq!(classify_http_status(302), FailureType::Terminal);
    }

    #[test]
    fn test_classify_error_network_is_transient() {
        let error = SourceError::network("https://example.org", "connection refused");
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_error_certificate_is_terminal() {
        let error = SourceError::network("https://example.org", "invalid peer certificate");
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    #[test]
    fn test_classify_error_terminal_kinds() {
        assert_eq!(
            classify_error(&SourceError::not_found("no pmcid")),
            FailureType::Terminal
        );
        assert_eq!(
            classify_error(&SourceError::unsupported("no title")),
            FailureType::Terminal
        );
        assert_eq!(classify_error(&SourceError::Cancelled), FailureType::Terminal);
    }

    #[test]
    fn test_classify_error_timeout_and_rate_limit() {
        assert_eq!(
            classify_error(&SourceError::timeout("page load")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&SourceError::rate_limited("https://x", None)),
            FailureType::RateLimited
        );
    }

    // ==================== Outcome Mapping Tests ====================

    #[test]
    fn test_outcome_for_http_statuses() {
        assert_eq!(
            SourceError::http_status("u", 404).outcome(),
            AttemptOutcome::NotFound
        );
        assert_eq!(
            SourceError::http_status("u", 403).outcome(),
            AttemptOutcome::Rejected
        );
        assert_eq!(
            SourceError::http_status("u", 502).outcome(),
            AttemptOutcome::NetworkError
        );
        assert_eq!(
            SourceError::http_status("u", 408).outcome(),
            AttemptOutcome::Timeout
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limited() {
        let error = SourceError::rate_limited("u", Some(Duration::from_secs(5)));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(SourceError::timeout("x").retry_after(), None);
    }

    #[test]
    fn test_error_messages_carry_context() {
        let msg = SourceError::http_status("https://pmc.example/a", 500).to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("https://pmc.example/a"));
    }
}
