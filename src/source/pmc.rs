//! PubMed Central repository source.
//!
//! Resolution steps for one attempt:
//! 1. DOI to PMCID through the NCBI ID converter, unless the request already
//!    carries a PMCID
//! 2. Article page `https://pmc.ncbi.nlm.nih.gov/articles/{PMCID}/`, scanned
//!    for a citation meta tag or the best download anchor
//! 3. Fallback to `{article}/pdf/` when the page offers nothing usable

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::http_client::{build_source_http_client, fetch_artifact, fetch_text};
use super::page::find_pdf_link;
use super::{
    AccessTier, AttemptContext, ProtocolKind, RawArtifact, SourceAdapter, SourceDescriptor,
    SourceError, SourceOptions,
};
use crate::request::AcquisitionRequest;

/// Host shared by the PMC article pages and PDF links.
pub const PMC_HOST: &str = "pmc.ncbi.nlm.nih.gov";

const DEFAULT_IDCONV_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/";
const DEFAULT_ARTICLE_BASE_URL: &str = "https://pmc.ncbi.nlm.nih.gov/articles/";
const TOOL_NAME: &str = "paperfetch";

#[derive(Debug, Deserialize)]
struct IdConvResponse {
    #[serde(default)]
    records: Vec<IdConvRecord>,
}

#[derive(Debug, Deserialize)]
struct IdConvRecord {
    pmcid: Option<String>,
    status: Option<String>,
    errmsg: Option<String>,
}

/// DOI to PMCID conversion through the NCBI ID converter.
#[derive(Debug, Clone)]
pub struct PmcIdConverter {
    client: Client,
    endpoint: String,
    mailto: Option<String>,
}

impl PmcIdConverter {
    /// Creates a converter against the public NCBI endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(options: &SourceOptions) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client("pmc-idconv", options.timeouts)?,
            endpoint: DEFAULT_IDCONV_URL.to_string(),
            mailto: options.mailto.clone(),
        })
    }

    /// Points the converter at another endpoint (tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_url(&self, doi: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| SourceError::unsupported(format!("bad ID converter URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("ids", doi)
                .append_pair("format", "json")
                .append_pair("tool", TOOL_NAME);
            if let Some(mailto) = &self.mailto {
                query.append_pair("email", mailto);
            }
        }
        Ok(url.to_string())
    }

    /// Returns the PMCID for `request`, using a known one when present.
    ///
    /// # Errors
    ///
    /// [`SourceError::NotFound`] when the article is not deposited in PMC,
    /// otherwise the transport error.
    #[instrument(skip(self, request), fields(doi = %request.doi()))]
    pub async fn resolve(&self, request: &AcquisitionRequest) -> Result<String, SourceError> {
        if let Some(pmcid) = &request.known().pmcid {
            return Ok(pmcid.clone());
        }

        let url = self.request_url(request.doi())?;
        let body = fetch_text(&self.client, &url).await?;
        let response: IdConvResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::network(&url, format!("unparseable ID converter response: {e}")))?;

        let record = response
            .records
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found("ID converter returned no records"))?;
        if record.status.as_deref() == Some("error") {
            return Err(SourceError::not_found(format!(
                "ID converter: {}",
                record.errmsg.unwrap_or_else(|| "unknown identifier".to_string())
            )));
        }
        let pmcid = record
            .pmcid
            .filter(|id| id.starts_with("PMC"))
            .ok_or_else(|| SourceError::not_found("article not deposited in PMC"))?;
        debug!(pmcid = %pmcid, "resolved PMCID");
        Ok(pmcid)
    }
}

/// PubMed Central adapter.
#[derive(Debug)]
pub struct PmcSource {
    descriptor: SourceDescriptor,
    client: Client,
    converter: Arc<PmcIdConverter>,
    article_base: String,
    max_bytes: u64,
}

impl PmcSource {
    /// Built-in descriptor: free tier, tried first.
    #[must_use]
    pub fn default_descriptor() -> SourceDescriptor {
        SourceDescriptor::new("pmc", PMC_HOST, ProtocolKind::DirectHttp, AccessTier::Free)
            .with_priority(10)
    }

    /// Creates the adapter with its own ID converter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(descriptor: SourceDescriptor, options: &SourceOptions) -> Result<Self, SourceError> {
        let converter = Arc::new(PmcIdConverter::new(options)?);
        Self::with_converter(descriptor, converter, options)
    }

    /// Creates the adapter around a shared converter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn with_converter(
        descriptor: SourceDescriptor,
        converter: Arc<PmcIdConverter>,
        options: &SourceOptions,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            descriptor,
            client: build_source_http_client("pmc", options.timeouts)?,
            converter,
            article_base: DEFAULT_ARTICLE_BASE_URL.to_string(),
            max_bytes: options.max_artifact_bytes,
        })
    }

    /// Points article pages at another base URL (tests).
    #[must_use]
    pub fn with_article_base(mut self, base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.article_base = base;
        self
    }

    /// Article landing page for `pmcid`.
    #[must_use]
    pub fn article_url(&self, pmcid: &str) -> String {
        article_url(&self.article_base, pmcid)
    }
}

/// `{base}{PMCID}/` with a trailing slash, which PMC requires for relative links.
pub(crate) fn article_url(base: &str, pmcid: &str) -> String {
    format!("{}/{pmcid}/", base.trim_end_matches('/'))
}

#[async_trait]
impl SourceAdapter for PmcSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request, ctx), fields(doi = %request.doi(), attempt = ctx.attempt))]
    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        let pmcid = self.converter.resolve(request).await?;
        let article = self.article_url(&pmcid);
        let fallback = format!("{article}pdf/");

        let page_link = match fetch_text(&self.client, &article).await {
            Ok(html) => Url::parse(&article)
                .ok()
                .and_then(|base| find_pdf_link(&html, &base)),
            Err(error @ SourceError::NotFound { .. }) => return Err(error),
            Err(error) => {
                debug!(error = %error, "article page unavailable; trying direct PDF path");
                None
            }
        };

        let Some(link) = page_link.filter(|link| *link != fallback) else {
            return fetch_artifact(&self.client, &fallback, self.max_bytes).await;
        };

        debug!(link = %link, remaining_ms = ctx.remaining().as_millis(), "following page PDF link");
        match fetch_artifact(&self.client, &link, self.max_bytes).await {
            Err(SourceError::NotFound { .. }) => {
                fetch_artifact(&self.client, &fallback, self.max_bytes).await
            }
            other => other,
        }
    }
}
