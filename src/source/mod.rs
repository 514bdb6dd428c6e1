//! Source adapters: one per external system that can supply an artifact.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - Async trait each source implements: one logical fetch
//!   attempt for one identifier, no internal retries
//! - [`SourceDescriptor`] - Configuration-time data: name, priority, protocol,
//!   access tier, host key and per-host limits
//! - [`PmcSource`] - PubMed Central repository (ID converter, article page, PDF)
//! - [`EuropePmcSource`] - Europe PMC aggregator (DOI search, title fallback, render endpoint)
//! - [`MirrorSource`] - Configured relay mirrors with per-mirror health tracking
//! - [`BrowserSource`] - Browser automation over an injected [`BrowserDriver`]
//!
//! Sources sharing a `host` in their descriptors share one per-host limiter
//! slot, so the browser source and the PMC source together never exceed the
//! PMC politeness budget.

pub mod browser;
mod error;
mod europepmc;
mod http_client;
mod mirror;
pub mod page;
mod pmc;
mod utils;

pub use browser::{BrowserDriver, BrowserOptions, BrowserPage, BrowserSource, ChromiumDriver};
pub use error::{AttemptOutcome, FailureType, SourceError, classify_error, classify_http_status};
pub use europepmc::{EuropePmcSource, TITLE_MATCH_THRESHOLD, title_similarity};
pub use http_client::{HttpTimeouts, build_source_http_client, fetch_artifact, fetch_text};
pub use mirror::{MIRROR_FAILURE_LIMIT, MirrorSource};
pub use pmc::{PMC_HOST, PmcIdConverter, PmcSource};
pub use utils::{absolutize_url, canonical_host, compile_static_regex, host_of};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::acquire::CancelToken;
use crate::request::AcquisitionRequest;

/// Default per-host concurrency cap.
pub const DEFAULT_HOST_MAX_CONCURRENT: usize = 2;

/// Default minimum spacing between requests to one host.
pub const DEFAULT_HOST_MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Default cap on artifact size (100 MiB).
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 100 * 1024 * 1024;

/// How a source talks to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Plain HTTP requests.
    DirectHttp,
    /// Drives a headless browser; seconds per attempt rather than milliseconds.
    BrowserAutomation,
}

/// Whether a source serves only openly licensed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    /// Serves open-access content; promoted when the classifier says `open`.
    Free,
    /// Can serve restricted content.
    Restricted,
}

/// Per-host politeness budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimit {
    /// Maximum simultaneous requests to the host.
    pub max_concurrent: usize,
    /// Minimum spacing between request starts.
    pub min_interval: Duration,
}

impl Default for HostLimit {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_HOST_MAX_CONCURRENT,
            min_interval: DEFAULT_HOST_MIN_INTERVAL,
        }
    }
}

/// Configuration-time description of a source. Read-only during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Stable lowercase name; appears in filenames and reports.
    pub name: String,
    /// Lower is tried earlier.
    pub priority: i32,
    /// Transport used by the adapter.
    pub protocol: ProtocolKind,
    /// Access tier for classifier-driven reordering.
    pub tier: AccessTier,
    /// Limiter key. Sources with the same host share one limit.
    pub host: String,
    /// Politeness budget applied to `host`.
    pub limit: HostLimit,
    /// Disabled sources are never attempted.
    pub enabled: bool,
    /// Overrides the retry policy's attempt count for this source.
    pub max_attempts: Option<u32>,
}

impl SourceDescriptor {
    /// Creates an enabled descriptor with default limits and priority 100.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        protocol: ProtocolKind,
        tier: AccessTier,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 100,
            protocol,
            tier,
            host: canonical_host(&host.into()),
            limit: HostLimit::default(),
            enabled: true,
            max_attempts: None,
        }
    }

    /// Sets the priority rank.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the per-host limit.
    #[must_use]
    pub fn with_limit(mut self, limit: HostLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Enables or disables the source.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Overrides the attempt budget for this source.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Applies a per-source override from configuration.
    #[must_use]
    pub fn apply(mut self, overrides: &SourceOverride) -> Self {
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(priority) = overrides.priority {
            self.priority = priority;
        }
        if let Some(max_concurrent) = overrides.max_concurrent {
            self.limit.max_concurrent = max_concurrent.max(1);
        }
        if let Some(min_interval) = overrides.min_interval {
            self.limit.min_interval = min_interval;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = Some(max_attempts.max(1));
        }
        self
    }

    /// True when `name` is safe to embed in artifact filenames.
    ///
    /// Names are restricted to `[a-z0-9-]` so the `_` separator in
    /// `{identifier}_{source}.pdf` stays unambiguous, and to
    /// [`MAX_SOURCE_NAME_LEN`] bytes so the filename fits the platform limit.
    #[must_use]
    pub fn has_valid_name(&self) -> bool {
        !self.name.is_empty()
            && self.name.len() <= MAX_SOURCE_NAME_LEN
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }
}

/// Longest source name accepted for artifact filenames.
pub const MAX_SOURCE_NAME_LEN: usize = 32;

/// Per-source configuration override; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOverride {
    /// Enable or disable the source.
    pub enabled: Option<bool>,
    /// Priority rank.
    pub priority: Option<i32>,
    /// Per-host concurrency cap.
    pub max_concurrent: Option<usize>,
    /// Per-host minimum request spacing.
    pub min_interval: Option<Duration>,
    /// Attempt budget for this source.
    pub max_attempts: Option<u32>,
}

/// Bytes returned by one successful fetch, before validation.
#[derive(Clone, PartialEq, Eq)]
pub struct RawArtifact {
    /// Response body.
    pub bytes: Vec<u8>,
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// URL the bytes were finally served from.
    pub url: String,
}

impl fmt::Debug for RawArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawArtifact")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("url", &self.url)
            .finish()
    }
}

/// Per-attempt context handed to adapters.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-indexed attempt number against this source.
    pub attempt: u32,
    /// Point in time by which the adapter must have returned.
    pub deadline: Instant,
    /// Batch-level cancellation.
    pub cancel: CancelToken,
}

impl AttemptContext {
    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// One external system able to supply artifacts.
///
/// Implementations perform exactly one logical fetch per call (possibly
/// several requests to resolve a landing page) and never retry internally.
/// Shared state must be safe for concurrent calls.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configuration for this source.
    fn descriptor(&self) -> &SourceDescriptor;

    /// Attempts one fetch of the artifact for `request`.
    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError>;
}

/// Construction options shared by the built-in sources.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// HTTP client timeouts.
    pub timeouts: HttpTimeouts,
    /// Bodies larger than this are truncated and later rejected.
    pub max_artifact_bytes: u64,
    /// Contact address sent to NCBI and Europe PMC.
    pub mailto: Option<String>,
    /// Mirror base URLs; the mirror source is skipped when empty.
    pub mirrors: Vec<String>,
    /// Browser source settings; skipped when `None`.
    pub browser: Option<BrowserOptions>,
    /// Per-source overrides keyed by source name.
    pub overrides: HashMap<String, SourceOverride>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            timeouts: HttpTimeouts::default(),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            mailto: None,
            mirrors: Vec::new(),
            browser: None,
            overrides: HashMap::new(),
        }
    }
}

impl SourceOptions {
    fn descriptor(&self, base: SourceDescriptor) -> SourceDescriptor {
        match self.overrides.get(&base.name) {
            Some(overrides) => base.apply(overrides),
            None => base,
        }
    }
}

/// Builds the built-in sources in default priority order.
///
/// A source that fails to construct is logged and skipped; the rest remain usable.
#[must_use]
pub fn build_default_sources(options: &SourceOptions) -> Vec<Arc<dyn SourceAdapter>> {
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    let converter = match PmcIdConverter::new(options) {
        Ok(converter) => Some(Arc::new(converter)),
        Err(error) => {
            warn!(error = %error, "PMC ID converter unavailable; PMC-based sources skipped");
            None
        }
    };

    if let Some(converter) = &converter {
        match PmcSource::with_converter(
            options.descriptor(PmcSource::default_descriptor()),
            Arc::clone(converter),
            options,
        ) {
            Ok(source) => sources.push(Arc::new(source)),
            Err(error) => warn!(
                error = %error,
                "PMC source unavailable; continuing with remaining sources"
            ),
        }
    }

    match EuropePmcSource::new(
        options.descriptor(EuropePmcSource::default_descriptor()),
        options,
    ) {
        Ok(source) => sources.push(Arc::new(source)),
        Err(error) => warn!(
            error = %error,
            "Europe PMC source unavailable; continuing with remaining sources"
        ),
    }

    if let Some(browser) = &options.browser {
        let driver = Arc::new(ChromiumDriver::new(browser.clone()));
        let mut source = BrowserSource::new(
            options.descriptor(BrowserSource::default_descriptor()),
            driver,
            options.max_artifact_bytes,
        );
        if let Some(converter) = &converter {
            source = source.with_converter(Arc::clone(converter));
        }
        sources.push(Arc::new(source));
    }

    if !options.mirrors.is_empty() {
        match MirrorSource::new(
            options.descriptor(MirrorSource::default_descriptor()),
            options.mirrors.clone(),
            options,
        ) {
            Ok(source) => sources.push(Arc::new(source)),
            Err(error) => warn!(
                error = %error,
                "mirror source unavailable; continuing with remaining sources"
            ),
        }
    }

    sources
}
