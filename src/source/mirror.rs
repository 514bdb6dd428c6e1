//! Relay mirror source.
//!
//! Mirrors serve a landing page at `{mirror}/{doi}` that embeds the PDF in an
//! `embed`/`iframe` element or links to it. One logical attempt walks the
//! configured mirrors until one yields bytes. Mirrors that fail at the
//! transport level three times in a row are marked inactive and skipped.
//!
//! All mirrors share one limiter key, so the configured per-host budget
//! caps mirror traffic as a whole.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use super::http_client::{build_source_http_client, fetch_artifact, fetch_text};
use super::page::{embedded_sources, parse_anchors, select_download_element};
use super::utils::absolutize_url;
use super::{
    AccessTier, AttemptContext, FailureType, ProtocolKind, RawArtifact, SourceAdapter,
    SourceDescriptor, SourceError, SourceOptions, classify_error,
};
use crate::request::AcquisitionRequest;

/// Consecutive transport failures after which a mirror is skipped.
pub const MIRROR_FAILURE_LIMIT: u32 = 3;

const MIRROR_HOST_KEY: &str = "mirror";

/// Adapter over configured relay mirrors.
#[derive(Debug)]
pub struct MirrorSource {
    descriptor: SourceDescriptor,
    client: Client,
    mirrors: Vec<String>,
    failures: DashMap<String, AtomicU32>,
    max_bytes: u64,
}

impl MirrorSource {
    /// Built-in descriptor: restricted tier, tried last.
    #[must_use]
    pub fn default_descriptor() -> SourceDescriptor {
        SourceDescriptor::new(
            "mirror",
            MIRROR_HOST_KEY,
            ProtocolKind::DirectHttp,
            AccessTier::Restricted,
        )
        .with_priority(40)
    }

    /// Creates the adapter over `mirrors` (base URLs, trailing slash optional).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] when no mirror is given or the
    /// HTTP client cannot be built.
    pub fn new(
        descriptor: SourceDescriptor,
        mirrors: Vec<String>,
        options: &SourceOptions,
    ) -> Result<Self, SourceError> {
        let mirrors: Vec<String> = mirrors
            .into_iter()
            .map(|m| m.trim().trim_end_matches('/').to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if mirrors.is_empty() {
            return Err(SourceError::unsupported("no mirrors configured"));
        }

        let failures = mirrors
            .iter()
            .map(|m| (m.clone(), AtomicU32::new(0)))
            .collect();
        Ok(Self {
            descriptor,
            client: build_source_http_client("mirror", options.timeouts)?,
            mirrors,
            failures,
            max_bytes: options.max_artifact_bytes,
        })
    }

    /// Consecutive transport failures recorded for `mirror`.
    #[must_use]
    pub fn failure_count(&self, mirror: &str) -> u32 {
        self.failures
            .get(mirror.trim_end_matches('/'))
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    /// Mirrors below the failure limit, shuffled.
    fn active_mirrors(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .mirrors
            .iter()
            .filter(|m| self.failure_count(m) < MIRROR_FAILURE_LIMIT)
            .cloned()
            .collect();
        active.shuffle(&mut rand::thread_rng());
        active
    }

    fn record_success(&self, mirror: &str) {
        if let Some(count) = self.failures.get(mirror) {
            count.store(0, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, mirror: &str) {
        if let Some(count) = self.failures.get(mirror) {
            let failures = count.fetch_add(1, Ordering::SeqCst) + 1;
            if failures == MIRROR_FAILURE_LIMIT {
                warn!(mirror, failures, "mirror marked inactive");
            }
        }
    }

    async fn try_mirror(&self, mirror: &str, doi: &str) -> Result<RawArtifact, SourceError> {
        let page_url = format!("{mirror}/{doi}");
        let html = fetch_text(&self.client, &page_url).await?;
        let base = Url::parse(&page_url)
            .map_err(|e| SourceError::unsupported(format!("bad mirror URL {page_url}: {e}")))?;

        let link = embedded_sources(&html)
            .into_iter()
            .find_map(|src| absolutize_url(&src, &base))
            .or_else(|| {
                let anchors = parse_anchors(&html);
                select_download_element(&anchors)
                    .and_then(|element| element.href.as_deref())
                    .and_then(|href| absolutize_url(href, &base))
            })
            .ok_or_else(|| SourceError::not_found(format!("no PDF link on {page_url}")))?;

        debug!(mirror, link = %link, "mirror offered PDF link");
        fetch_artifact(&self.client, &link, self.max_bytes).await
    }
}

#[async_trait]
impl SourceAdapter for MirrorSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request, ctx), fields(doi = %request.doi(), attempt = ctx.attempt))]
    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        let active = self.active_mirrors();
        if active.is_empty() {
            return Err(SourceError::not_found("all mirrors inactive"));
        }

        let mut transient: Option<SourceError> = None;
        for mirror in &active {
            if ctx.cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            if ctx.remaining().is_zero() {
                return Err(SourceError::timeout("mirror attempt out of time"));
            }

            match self.try_mirror(mirror, request.doi()).await {
                Ok(artifact) => {
                    self.record_success(mirror);
                    return Ok(artifact);
                }
                Err(error) if classify_error(&error) == FailureType::Terminal => {
                    debug!(mirror, error = %error, "mirror has no copy");
                }
                Err(error) => {
                    debug!(mirror, error = %error, "mirror unreachable");
                    self.record_failure(mirror);
                    transient.get_or_insert(error);
                }
            }
        }

        Err(transient.unwrap_or_else(|| SourceError::not_found("no mirror had the article")))
    }
}
