//! Shared helpers for source adapters: static regexes, host keys and link resolution.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// `citation_pdf_url` meta tag, the most reliable PDF pointer on publisher and repository pages.
pub static CITATION_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta\s+[^>]*(?:name|property)\s*=\s*["']citation_pdf_url["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
});

/// Limiter key for a host: lowercase, without a leading "www." or trailing '.'.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    host.trim_start_matches("www.").trim_end_matches('.').to_string()
}

/// Host key of a URL, used for per-host limiting.
///
/// Returns "unknown" for malformed URLs so they are still limited together.
#[must_use]
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(canonical_host))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolves a possibly relative link against the page it was found on.
///
/// Absolute http(s) links pass through; `//host/path` becomes https.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}

/// Returns the first capture of `regex` in `html`, trimmed.
#[must_use]
pub fn extract_meta_value(html: &str, regex: &Regex) -> Option<String> {
    regex
        .captures(html)
        .and_then(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_host_trim_www_and_trailing_dot_lowercase() {
        assert_eq!(canonical_host("  www.Example.COM.  "), "example.com");
        assert_eq!(canonical_host("WWW.NCBI.NLM.NIH.GOV."), "ncbi.nlm.nih.gov");
    }

    #[test]
    fn test_host_of_url() {
        assert_eq!(
            host_of("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/"),
            "ncbi.nlm.nih.gov"
        );
        assert_eq!(host_of("http://127.0.0.1:8080/x"), "127.0.0.1");
        assert_eq!(host_of("not a url"), "unknown");
    }

    #[test]
    fn test_absolutize_url_variants() {
        let base = Url::parse("https://pmc.ncbi.nlm.nih.gov/articles/PMC1/").unwrap();
        assert_eq!(
            absolutize_url("pdf/main.pdf", &base).unwrap(),
            "https://pmc.ncbi.nlm.nih.gov/articles/PMC1/pdf/main.pdf"
        );
        assert_eq!(
            absolutize_url("/articles/PMC1/pdf/", &base).unwrap(),
            "https://pmc.ncbi.nlm.nih.gov/articles/PMC1/pdf/"
        );
        assert_eq!(
            absolutize_url("//cdn.example.org/a.pdf", &base).unwrap(),
            "https://cdn.example.org/a.pdf"
        );
    }

    #[test]
    fn test_extract_citation_pdf_meta() {
        let html = r#"<head><meta name="citation_pdf_url" content=" https://x.org/a.pdf "></head>"#;
        assert_eq!(
            extract_meta_value(html, &CITATION_PDF_RE).as_deref(),
            Some("https://x.org/a.pdf")
        );
    }
}
