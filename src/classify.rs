//! Open-access classification and the source ordering it drives.
//!
//! The [`AccessClassifier`] asks a bibliographic service (Crossref by default)
//! whether a DOI is openly licensed. The answer is advisory: it only decides
//! whether free-tier sources are promoted ahead of restricted ones. Lookup
//! failures degrade to [`AccessStatus::Unknown`] after a small retry budget
//! and never block the fallback chain.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::acquire::CancelToken;
use crate::request::AcquisitionRequest;
use crate::source::{AccessTier, HttpTimeouts, SourceAdapter, SourceError, build_source_http_client};

/// Default Crossref API base URL.
const DEFAULT_CROSSREF_BASE_URL: &str = "https://api.crossref.org";

/// Default lookup attempts before degrading to `Unknown`.
pub const DEFAULT_LOOKUP_ATTEMPTS: u32 = 2;

const DEFAULT_LOOKUP_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Open-access verdict for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    /// Openly licensed; free sources go first.
    Open,
    /// Known, but no open license.
    Restricted,
    /// Lookup failed, skipped or inconclusive.
    Unknown,
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Restricted => "restricted",
            Self::Unknown => "unknown",
        })
    }
}

/// Failure of a single bibliographic lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The service does not know the identifier. Not retried.
    #[error("identifier not known to lookup service")]
    NotFound,
    /// Network or server trouble. Retried within the budget.
    #[error("lookup failed: {0}")]
    Transient(String),
    /// The service answered with something unparseable. Not retried.
    #[error("unexpected lookup response: {0}")]
    Malformed(String),
}

/// A bibliographic service able to tell whether a DOI is open access.
#[async_trait]
pub trait AccessLookup: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &'static str;

    /// One lookup for `doi`.
    async fn lookup(&self, doi: &str) -> Result<AccessStatus, LookupError>;
}

// ==================== Crossref API Response Types ====================

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    status: String,
    message: CrossrefMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct CrossrefMessage {
    license: Vec<CrossrefLicense>,
    link: Vec<CrossrefLink>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLicense {
    #[serde(rename = "URL")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: String,
}

impl CrossrefMessage {
    fn access_status(&self) -> AccessStatus {
        let open_license = self.license.iter().any(|license| {
            let url = license.url.to_ascii_lowercase();
            url.contains("creativecommons.org") || url.contains("cc-by")
        });
        let repository_link = self.link.iter().any(|link| {
            let url = link.url.to_ascii_lowercase();
            url.contains("ncbi.nlm.nih.gov/pmc") || url.contains("europepmc.org")
        });

        if open_license || repository_link {
            AccessStatus::Open
        } else {
            AccessStatus::Restricted
        }
    }
}

// ==================== CrossrefLookup ====================

/// Open-access lookup against the Crossref works API.
///
/// Requests carry a `mailto` parameter when configured, which routes them
/// to Crossref's polite pool.
pub struct CrossrefLookup {
    client: Client,
    base_url: String,
    mailto: Option<String>,
}

impl fmt::Debug for CrossrefLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossrefLookup")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

impl CrossrefLookup {
    /// Creates a lookup against the public Crossref API.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(mailto: Option<String>, timeouts: HttpTimeouts) -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_CROSSREF_BASE_URL, mailto, timeouts)
    }

    /// Creates a lookup against a custom base URL (tests, mirrors).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        mailto: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client("crossref", timeouts)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mailto: mailto.filter(|m| !m.trim().is_empty()),
        })
    }

    fn works_url(&self, doi: &str) -> String {
        let mut url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));
        if let Some(mailto) = &self.mailto {
            url.push_str("?mailto=");
            url.push_str(&urlencoding::encode(mailto));
        }
        url
    }
}

#[async_trait]
impl AccessLookup for CrossrefLookup {
    fn name(&self) -> &'static str {
        "crossref"
    }

    #[instrument(skip(self), fields(lookup = "crossref"))]
    async fn lookup(&self, doi: &str) -> Result<AccessStatus, LookupError> {
        let url = self.works_url(doi);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            404 => return Err(LookupError::NotFound),
            408 | 429 | 500..=599 => {
                return Err(LookupError::Transient(format!("Crossref returned HTTP {status}")));
            }
            _ => return Err(LookupError::Malformed(format!("Crossref returned HTTP {status}"))),
        }

        let body: CrossrefResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;
        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(LookupError::Malformed(format!(
                "Crossref status '{}'",
                body.status
            )));
        }

        let access = body.message.access_status();
        debug!(%access, "Crossref classification");
        Ok(access)
    }
}

// ==================== AccessClassifier ====================

/// Wraps an [`AccessLookup`] with a small fixed retry budget and a timeout.
#[derive(Clone)]
pub struct AccessClassifier {
    lookup: Option<Arc<dyn AccessLookup>>,
    attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
}

impl fmt::Debug for AccessClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClassifier")
            .field("lookup", &self.lookup.as_ref().map(|l| l.name()))
            .field("attempts", &self.attempts)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AccessClassifier {
    /// Creates a classifier backed by `lookup`.
    #[must_use]
    pub fn new(lookup: Arc<dyn AccessLookup>) -> Self {
        Self {
            lookup: Some(lookup),
            attempts: DEFAULT_LOOKUP_ATTEMPTS,
            retry_delay: DEFAULT_LOOKUP_RETRY_DELAY,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// A classifier that always answers `Unknown` (classification off).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            lookup: None,
            attempts: 0,
            retry_delay: Duration::ZERO,
            timeout: Duration::ZERO,
        }
    }

    /// Overrides the retry budget and per-lookup timeout.
    #[must_use]
    pub fn with_budget(mut self, attempts: u32, retry_delay: Duration, timeout: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self.timeout = timeout;
        self
    }

    /// Classifies `request`. Never fails; every failure path yields `Unknown`.
    #[instrument(skip(self, request, cancel), fields(doi = %request.doi()))]
    pub async fn classify(&self, request: &AcquisitionRequest, cancel: &CancelToken) -> AccessStatus {
        let Some(lookup) = &self.lookup else {
            return AccessStatus::Unknown;
        };

        for attempt in 1..=self.attempts {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return AccessStatus::Unknown,
                result = tokio::time::timeout(self.timeout, lookup.lookup(request.doi())) => result,
            };

            match result {
                Ok(Ok(status)) => return status,
                Ok(Err(LookupError::NotFound)) => {
                    debug!(lookup = lookup.name(), "identifier unknown to lookup service");
                    return AccessStatus::Unknown;
                }
                Ok(Err(LookupError::Malformed(detail))) => {
                    warn!(lookup = lookup.name(), detail = %detail, "malformed lookup response");
                    return AccessStatus::Unknown;
                }
                Ok(Err(LookupError::Transient(detail))) => {
                    debug!(lookup = lookup.name(), attempt, detail = %detail, "lookup failed");
                }
                Err(_) => {
                    debug!(lookup = lookup.name(), attempt, "lookup timed out");
                }
            }

            if attempt < self.attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return AccessStatus::Unknown,
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        warn!(
            lookup = lookup.name(),
            attempts = self.attempts,
            "classification unavailable; using configured source order"
        );
        AccessStatus::Unknown
    }
}

/// Orders enabled sources for one identifier.
///
/// Sources are sorted by priority (stable). When `status` is `Open`,
/// free-tier sources are moved ahead of restricted ones, each group keeping
/// its priority order. Otherwise the configured order is used unchanged.
#[must_use]
pub fn order_sources(
    status: AccessStatus,
    sources: &[Arc<dyn SourceAdapter>],
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut ordered: Vec<Arc<dyn SourceAdapter>> = sources
        .iter()
        .filter(|source| source.descriptor().enabled)
        .cloned()
        .collect();
    ordered.sort_by_key(|source| source.descriptor().priority);

    if status == AccessStatus::Open {
        ordered.sort_by_key(|source| match source.descriptor().tier {
            AccessTier::Free => 0,
            AccessTier::Restricted => 1,
        });
    }
    ordered
}
