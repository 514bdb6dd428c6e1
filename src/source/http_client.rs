//! Shared HTTP client construction and fetch helpers for the HTTP sources.
//!
//! Every HTTP source builds its client here so timeout, user-agent,
//! compression and proxy behavior stay consistent. Timeouts are passed in
//! explicitly rather than read from process-wide state.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, Proxy, Response};
use tracing::{debug, warn};

use super::{RawArtifact, SourceError};
use crate::acquire::parse_retry_after;
use crate::user_agent;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect and whole-request timeouts for source clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Whole-request timeout, including body.
    pub read: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Builds a source HTTP client using the shared policy.
///
/// `source_name` is only used for error messages and logging.
///
/// # Errors
///
/// Returns [`SourceError::Unsupported`] when client construction fails.
pub fn build_source_http_client(
    source_name: &str,
    timeouts: HttpTimeouts,
) -> Result<Client, SourceError> {
    let user_agent = user_agent::default_user_agent();

    match try_build_client(&user_agent, timeouts, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings; env proxies still apply on the fallback path.
            warn!(
                source = source_name,
                "source client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(&user_agent, timeouts, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(SourceError::unsupported(format!(
                    "{source_name}: HTTP client construction panicked"
                ))),
                Err(BuildClientFailure::Build(error)) => Err(SourceError::unsupported(format!(
                    "{source_name}: HTTP client construction failed: {error}"
                ))),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(SourceError::unsupported(format!(
            "{source_name}: HTTP client construction failed: {error}"
        ))),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    user_agent: &str,
    timeouts: HttpTimeouts,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    let user_agent = user_agent.to_string();
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(user_agent, timeouts);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(user_agent: String, timeouts: HttpTimeouts) -> ClientBuilder {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.read)
        .user_agent(user_agent)
        .cookie_store(true)
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Sends a GET and maps non-success statuses onto [`SourceError`].
///
/// 404/410 become `NotFound`, 429 becomes `RateLimited` with the parsed
/// `Retry-After`, anything else non-2xx becomes `HttpStatus`.
///
/// # Errors
///
/// Returns the mapped [`SourceError`] on transport failure or bad status.
pub async fn get_checked(client: &Client, url: &str) -> Result<Response, SourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::from_reqwest(url, &e))?;

    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    debug!(url, status, "non-success response");
    match status {
        404 | 410 => Err(SourceError::not_found(format!("HTTP {status} from {url}"))),
        429 => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            Err(SourceError::rate_limited(url, retry_after))
        }
        _ => Err(SourceError::http_status(url, status)),
    }
}

/// Fetches `url` as text.
///
/// # Errors
///
/// Returns [`SourceError`] on transport failure, bad status or body read failure.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, SourceError> {
    let response = get_checked(client, url).await?;
    response
        .text()
        .await
        .map_err(|e| SourceError::from_reqwest(url, &e))
}

/// Streams `url` into memory, stopping one byte past `max_bytes`.
///
/// Oversized bodies are returned truncated so the validator can reject them
/// without buffering the whole response.
///
/// # Errors
///
/// Returns [`SourceError`] on transport failure, bad status or body read failure.
pub async fn fetch_artifact(
    client: &Client,
    url: &str,
    max_bytes: u64,
) -> Result<RawArtifact, SourceError> {
    let response = get_checked(client, url).await?;
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let final_url = response.url().to_string();

    let limit = usize::try_from(max_bytes.saturating_add(1)).unwrap_or(usize::MAX);
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SourceError::from_reqwest(url, &e))?;
        let room = limit.saturating_sub(bytes.len());
        if chunk.len() >= room {
            bytes.extend_from_slice(&chunk[..room]);
            debug!(url, max_bytes, "response exceeds size cap, truncating");
            break;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(RawArtifact {
        bytes,
        content_type,
        url: final_url,
    })
}
