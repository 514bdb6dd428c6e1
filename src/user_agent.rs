//! User-Agent sent by every outbound HTTP client.
//!
//! NCBI and Europe PMC ask automated clients to identify themselves with a
//! contact point; one shared format keeps that consistent across sources.

const PROJECT_UA_URL: &str = "https://github.com/paperfetch/paperfetch";

/// User-Agent for source and lookup traffic.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("paperfetch/{version} (research-tool; +{PROJECT_UA_URL})")
}
