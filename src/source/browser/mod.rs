//! Browser automation source.
//!
//! Some repository pages only hand out the PDF to a real browser session
//! (cookies set by JavaScript, proof-of-work interstitials). This source
//! drives a browser through the [`BrowserDriver`] seam:
//!
//! 1. open the PMC article page
//! 2. list candidate elements and pick one with the pure
//!    [`select_download_element`] predicate
//! 3. fetch the chosen link inside the page session, falling back to the
//!    article's `/pdf/` path
//!
//! The driver is injected, so the flow is testable without a browser.
//! [`ChromiumDriver`] is the production implementation.

mod chromium;

pub use chromium::ChromiumDriver;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use super::page::{PageElement, select_download_element};
use super::pmc::{PMC_HOST, PmcIdConverter, article_url};
use super::utils::absolutize_url;
use super::{
    AccessTier, AttemptContext, ProtocolKind, RawArtifact, SourceAdapter, SourceDescriptor,
    SourceError,
};
use crate::request::AcquisitionRequest;

const DEFAULT_ARTICLE_BASE_URL: &str = "https://pmc.ncbi.nlm.nih.gov/articles/";
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);

/// Browser launch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    /// Chrome/Chromium binary; auto-detected when `None`.
    pub chrome_executable: Option<PathBuf>,
    /// Run without a window.
    pub headless: bool,
    /// Upper bound on one page load.
    pub navigation_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }
}

/// Opens pages in a browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigates a fresh page to `url` and waits for it to load.
    async fn open(&self, url: &str) -> Result<Box<dyn BrowserPage>, SourceError>;
}

/// One open page.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Interactive elements in document order.
    async fn elements(&self) -> Result<Vec<PageElement>, SourceError>;

    /// Fetches `url` with the page's cookies, keeping at most `max_bytes + 1` bytes.
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<RawArtifact, SourceError>;

    /// Closes the page. Errors are ignored.
    async fn close(self: Box<Self>);
}

/// Browser-automation adapter over PMC article pages.
pub struct BrowserSource {
    descriptor: SourceDescriptor,
    driver: Arc<dyn BrowserDriver>,
    converter: Option<Arc<PmcIdConverter>>,
    article_base: String,
    max_bytes: u64,
}

impl std::fmt::Debug for BrowserSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSource")
            .field("descriptor", &self.descriptor)
            .field("article_base", &self.article_base)
            .field("resolves_pmcid", &self.converter.is_some())
            .finish_non_exhaustive()
    }
}

impl BrowserSource {
    /// Built-in descriptor. Shares the PMC host so both sources draw on one
    /// politeness budget.
    #[must_use]
    pub fn default_descriptor() -> SourceDescriptor {
        SourceDescriptor::new(
            "browser",
            PMC_HOST,
            ProtocolKind::BrowserAutomation,
            AccessTier::Free,
        )
        .with_priority(30)
        .with_max_attempts(2)
    }

    /// Creates the adapter. Without a converter only requests carrying a
    /// PMCID are supported.
    #[must_use]
    pub fn new(descriptor: SourceDescriptor, driver: Arc<dyn BrowserDriver>, max_bytes: u64) -> Self {
        Self {
            descriptor,
            driver,
            converter: None,
            article_base: DEFAULT_ARTICLE_BASE_URL.to_string(),
            max_bytes,
        }
    }

    /// Resolves missing PMCIDs through `converter`.
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<PmcIdConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Points article pages at another base URL (tests).
    #[must_use]
    pub fn with_article_base(mut self, base: impl Into<String>) -> Self {
        self.article_base = base.into();
        self
    }

    async fn pmcid(&self, request: &AcquisitionRequest) -> Result<String, SourceError> {
        if let Some(pmcid) = &request.known().pmcid {
            return Ok(pmcid.clone());
        }
        match &self.converter {
            Some(converter) => converter.resolve(request).await,
            None => Err(SourceError::unsupported(
                "browser source needs a PMCID for this request",
            )),
        }
    }

    async fn download(
        &self,
        page: &dyn BrowserPage,
        article: &str,
    ) -> Result<RawArtifact, SourceError> {
        let fallback = format!("{article}pdf/");
        let base = Url::parse(article)
            .map_err(|e| SourceError::unsupported(format!("bad article URL {article}: {e}")))?;

        let elements = page.elements().await?;
        let chosen = select_download_element(&elements)
            .and_then(|element| element.href.as_deref())
            .and_then(|href| absolutize_url(href, &base))
            .filter(|link| *link != fallback);

        if let Some(link) = chosen {
            debug!(link = %link, candidates = elements.len(), "download element selected");
            match page.fetch(&link, self.max_bytes).await {
                Ok(artifact) if !is_html(&artifact) => return Ok(artifact),
                Ok(_) => debug!(link = %link, "selected link served HTML; trying direct PDF path"),
                Err(error @ (SourceError::Cancelled | SourceError::Timeout { .. })) => {
                    return Err(error);
                }
                Err(error) => debug!(link = %link, error = %error, "selected link failed"),
            }
        } else {
            debug!(candidates = elements.len(), "no download element; trying direct PDF path");
        }

        page.fetch(&fallback, self.max_bytes).await
    }
}

fn is_html(artifact: &RawArtifact) -> bool {
    artifact
        .content_type
        .as_deref()
        .is_some_and(|t| t.to_ascii_lowercase().contains("html"))
}

#[async_trait]
impl SourceAdapter for BrowserSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request, ctx), fields(doi = %request.doi(), attempt = ctx.attempt))]
    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        let pmcid = self.pmcid(request).await?;
        let article = article_url(&self.article_base, &pmcid);

        let page = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
            page = self.driver.open(&article) => page?,
        };
        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => Err(SourceError::Cancelled),
            result = self.download(page.as_ref(), &article) => result,
        };
        page.close().await;
        result
    }
}
