//! Europe PMC aggregator source.
//!
//! Looks the article up through the Europe PMC REST search (by DOI, then by
//! title when the request carries one) and downloads the rendered PDF from
//! `ptpmcrender.fcgi`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::http_client::{build_source_http_client, fetch_artifact, fetch_text};
use super::{
    AccessTier, AttemptContext, ProtocolKind, RawArtifact, SourceAdapter, SourceDescriptor,
    SourceError, SourceOptions,
};
use crate::request::AcquisitionRequest;

const DEFAULT_SEARCH_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";
const DEFAULT_RENDER_URL: &str = "https://europepmc.org/backend/ptpmcrender.fcgi";
const EUROPEPMC_HOST: &str = "europepmc.org";

/// Minimum similarity for a title-search hit to be accepted.
pub const TITLE_MATCH_THRESHOLD: f64 = 0.8;

const SEARCH_PAGE_SIZE: &str = "5";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchResponse {
    result_list: ResultList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultList {
    result: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchHit {
    pmcid: Option<String>,
    title: Option<String>,
}

/// Similarity between two titles in `0.0..=1.0`.
///
/// Titles are compared after lowercasing and stripping punctuation: equal
/// titles score 1.0, one contained in the other 0.8, anything else the
/// normalized Levenshtein similarity.
#[must_use]
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.8;
    }
    strsim::normalized_levenshtein(&a, &b)
}

fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Europe PMC adapter.
#[derive(Debug)]
pub struct EuropePmcSource {
    descriptor: SourceDescriptor,
    client: Client,
    search_url: String,
    render_url: String,
    max_bytes: u64,
}

impl EuropePmcSource {
    /// Built-in descriptor: free tier, after PMC.
    #[must_use]
    pub fn default_descriptor() -> SourceDescriptor {
        SourceDescriptor::new(
            "europepmc",
            EUROPEPMC_HOST,
            ProtocolKind::DirectHttp,
            AccessTier::Free,
        )
        .with_priority(20)
    }

    /// Creates the adapter against the public endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(descriptor: SourceDescriptor, options: &SourceOptions) -> Result<Self, SourceError> {
        Ok(Self {
            descriptor,
            client: build_source_http_client("europepmc", options.timeouts)?,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            render_url: DEFAULT_RENDER_URL.to_string(),
            max_bytes: options.max_artifact_bytes,
        })
    }

    /// Points search and render requests elsewhere (tests).
    #[must_use]
    pub fn with_endpoints(mut self, search_url: impl Into<String>, render_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self.render_url = render_url.into();
        self
    }

    fn search_request_url(&self, query: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(&self.search_url)
            .map_err(|e| SourceError::unsupported(format!("bad Europe PMC search URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("format", "json")
            .append_pair("resultType", "lite")
            .append_pair("pageSize", SEARCH_PAGE_SIZE);
        Ok(url.to_string())
    }

    fn render_request_url(&self, pmcid: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(&self.render_url)
            .map_err(|e| SourceError::unsupported(format!("bad Europe PMC render URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("accid", pmcid)
            .append_pair("blobtype", "pdf");
        Ok(url.to_string())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SourceError> {
        let url = self.search_request_url(query)?;
        let body = fetch_text(&self.client, &url).await?;
        let response: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::network(&url, format!("unparseable search response: {e}")))?;
        Ok(response.result_list.result)
    }

    async fn find_pmcid(&self, request: &AcquisitionRequest) -> Result<String, SourceError> {
        if let Some(pmcid) = &request.known().pmcid {
            return Ok(pmcid.clone());
        }

        let hits = self.search(&format!("DOI:\"{}\"", request.doi())).await?;
        if let Some(pmcid) = hits.into_iter().find_map(|hit| hit.pmcid) {
            debug!(pmcid = %pmcid, "found by DOI");
            return Ok(pmcid);
        }

        let Some(title) = request.title() else {
            return Err(SourceError::not_found("no Europe PMC full text for DOI"));
        };

        let query = format!("TITLE:\"{}\"", title.replace('"', " "));
        let best = self
            .search(&query)
            .await?
            .into_iter()
            .filter_map(|hit| {
                let pmcid = hit.pmcid?;
                let score = title_similarity(title, hit.title.as_deref().unwrap_or_default());
                Some((score, pmcid))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, pmcid)) if score >= TITLE_MATCH_THRESHOLD => {
                debug!(pmcid = %pmcid, score, "found by title");
                Ok(pmcid)
            }
            Some((score, _)) => Err(SourceError::not_found(format!(
                "best title match scored {score:.2}, below {TITLE_MATCH_THRESHOLD}"
            ))),
            None => Err(SourceError::not_found("no Europe PMC full text for DOI or title")),
        }
    }
}

#[async_trait]
impl SourceAdapter for EuropePmcSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    #[instrument(skip(self, request, ctx), fields(doi = %request.doi(), attempt = ctx.attempt))]
    async fn attempt(
        &self,
        request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        let pmcid = self.find_pmcid(request).await?;
        let url = self.render_request_url(&pmcid)?;
        fetch_artifact(&self.client, &url, self.max_bytes).await
    }
}
