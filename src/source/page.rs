//! Landing-page heuristics for locating the element that yields the PDF.
//!
//! Article pages carry many PDF-looking links: tooltips explaining the PDF
//! format, hidden duplicates for screen readers, supplementary material.
//! [`is_download_trigger`] is a pure predicate over a [`PageElement`] that
//! rejects those, and [`select_download_element`] ranks the survivors. Both
//! the HTML-scanning sources and the browser source use them, so the
//! heuristics are tested once without a network or a browser.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use super::utils::{CITATION_PDF_RE, absolutize_url, compile_static_regex, extract_meta_value};

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<a\s([^>]*)>(.*?)</a>"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)([a-zA-Z][a-zA-Z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});

static BARE_HIDDEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(?:^|\s)hidden(?:\s|$|=)"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]+>"));

static EMBED_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<(?:embed|iframe)\s[^>]*src\s*=\s*["']([^"']+)["']"#)
});

const SUPPLEMENTARY_MARKERS: &[&str] = &["supplement", "appendix", "/media/"];

/// One interactive element on an article page.
///
/// Built either by scanning static HTML ([`parse_anchors`]) or from the live
/// DOM by the browser source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageElement {
    /// Lowercase tag name (`a`, `button`).
    pub tag: String,
    /// Link target as written on the page.
    pub href: Option<String>,
    /// Visible text, whitespace-collapsed.
    pub text: String,
    /// `aria-label` attribute.
    pub aria_label: Option<String>,
    /// `class` attribute.
    pub class_name: String,
    /// `id` attribute.
    pub id: String,
    /// `role` attribute.
    pub role: Option<String>,
    /// Whether the element is rendered.
    pub visible: bool,
    /// `aria-hidden="true"`.
    pub aria_hidden: bool,
}

impl PageElement {
    /// Convenience constructor for a visible anchor.
    #[must_use]
    pub fn anchor(href: &str, text: &str) -> Self {
        Self {
            tag: "a".to_string(),
            href: Some(href.to_string()),
            text: text.to_string(),
            visible: true,
            ..Self::default()
        }
    }

    fn href_lower(&self) -> String {
        self.href.as_deref().unwrap_or("").trim().to_ascii_lowercase()
    }

    fn is_cosmetic(&self) -> bool {
        let class = self.class_name.to_ascii_lowercase();
        class.contains("tooltip")
            || class.contains("sr-only")
            || self
                .role
                .as_deref()
                .is_some_and(|role| role.eq_ignore_ascii_case("tooltip"))
    }

    fn marked_as_download(&self) -> bool {
        self.id.eq_ignore_ascii_case("download")
            || self
                .class_name
                .split_whitespace()
                .any(|class| class.eq_ignore_ascii_case("download"))
    }
}

/// True when `element` plausibly triggers the article PDF download.
///
/// Rejects hidden and tooltip elements, empty or script links, and
/// supplementary material. Accepts PDF-looking links and elements explicitly
/// marked as the download control.
#[must_use]
pub fn is_download_trigger(element: &PageElement) -> bool {
    if !element.visible || element.aria_hidden || element.is_cosmetic() {
        return false;
    }

    let href = element.href_lower();
    if href.is_empty() || href == "#" || href.starts_with("javascript:") {
        return false;
    }

    let text = element.text.to_ascii_lowercase();
    if SUPPLEMENTARY_MARKERS
        .iter()
        .any(|marker| href.contains(marker) || text.contains(marker))
    {
        return false;
    }

    download_score(element) > 0
}

/// Ranks a candidate; higher is a more specific signal. Zero means "not a PDF control".
#[must_use]
pub fn download_score(element: &PageElement) -> u32 {
    let href = element.href_lower();
    let path = href.split(['?', '#']).next().unwrap_or("");
    let text = element.text.to_ascii_lowercase();
    let aria_pdf = element
        .aria_label
        .as_deref()
        .is_some_and(|label| label.trim().to_ascii_uppercase().starts_with("PDF"));

    if path.ends_with("/pdf/") || path.ends_with("/pdf") {
        100
    } else if aria_pdf {
        80
    } else if text.contains("download pdf") {
        70
    } else if path.ends_with(".pdf") {
        50
    } else if href.contains("pdf") {
        40
    } else if element.marked_as_download() {
        30
    } else {
        0
    }
}

/// Picks the best download trigger; ties keep page order.
#[must_use]
pub fn select_download_element(elements: &[PageElement]) -> Option<&PageElement> {
    elements
        .iter()
        .filter(|element| is_download_trigger(element))
        .fold(None, |best: Option<&PageElement>, candidate| match best {
            Some(current) if download_score(current) >= download_score(candidate) => Some(current),
            _ => Some(candidate),
        })
}

/// Extracts anchors from static HTML as [`PageElement`]s.
#[must_use]
pub fn parse_anchors(html: &str) -> Vec<PageElement> {
    ANCHOR_RE
        .captures_iter(html)
        .map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let inner = caps.get(2).map_or("", |m| m.as_str());
            let mut element = PageElement {
                tag: "a".to_string(),
                text: collapse_whitespace(&TAG_RE.replace_all(inner, " ")),
                visible: true,
                ..PageElement::default()
            };

            for attr in ATTR_RE.captures_iter(attrs) {
                let name = attr.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .map_or("", |m| m.as_str())
                    .to_string();
                match name.as_str() {
                    "href" => element.href = Some(value),
                    "aria-label" => element.aria_label = Some(value),
                    "class" => element.class_name = value,
                    "id" => element.id = value,
                    "role" => element.role = Some(value),
                    "aria-hidden" => element.aria_hidden = value.eq_ignore_ascii_case("true"),
                    "style" => {
                        let style = value.replace(' ', "").to_ascii_lowercase();
                        if style.contains("display:none") || style.contains("visibility:hidden") {
                            element.visible = false;
                        }
                    }
                    _ => {}
                }
            }

            let without_quoted = ATTR_RE.replace_all(attrs, " ");
            if BARE_HIDDEN_RE.is_match(&without_quoted) {
                element.visible = false;
            }
            element
        })
        .collect()
}

/// `src` values of `<embed>`/`<iframe>` elements, the usual PDF viewer on mirror pages.
#[must_use]
pub fn embedded_sources(html: &str) -> Vec<String> {
    EMBED_SRC_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|src| !src.is_empty() && src != "about:blank")
        .collect()
}

/// Finds the article PDF link on a static landing page.
///
/// Order: `citation_pdf_url` meta tag, then the best-ranked anchor.
#[must_use]
pub fn find_pdf_link(html: &str, page_url: &Url) -> Option<String> {
    if let Some(meta) = extract_meta_value(html, &CITATION_PDF_RE) {
        return absolutize_url(&meta, page_url);
    }

    let anchors = parse_anchors(html);
    select_download_element(&anchors)
        .and_then(|element| element.href.as_deref())
        .and_then(|href| absolutize_url(href, page_url))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Predicate Tests ====================

    #[test]
    fn test_trigger_accepts_pdf_path_link() {
        let element = PageElement::anchor("/articles/PMC1/pdf/", "PDF (2.1 MB)");
        assert!(is_download_trigger(&element));
    }

    #[test]
    fn test_trigger_rejects_tooltip_element() {
        let element = PageElement {
            class_name: "usa-tooltip usa-link".to_string(),
            ..PageElement::anchor("/articles/PMC1/pdf/", "PDF")
        };
        assert!(!is_download_trigger(&element));

        let element = PageElement {
            role: Some("tooltip".to_string()),
            ..PageElement::anchor("/articles/PMC1/pdf/", "PDF")
        };
        assert!(!is_download_trigger(&element));
    }

    #[test]
    fn test_trigger_rejects_hidden_and_aria_hidden() {
        let hidden = PageElement {
            visible: false,
            ..PageElement::anchor("/pdf/", "PDF")
        };
        let aria_hidden = PageElement {
            aria_hidden: true,
            ..PageElement::anchor("/pdf/", "PDF")
        };
        assert!(!is_download_trigger(&hidden));
        assert!(!is_download_trigger(&aria_hidden));
    }

    #[test]
    fn test_trigger_rejects_placeholder_hrefs() {
        assert!(!is_download_trigger(&PageElement::anchor("#", "Download PDF")));
        assert!(!is_download_trigger(&PageElement::anchor(
            "javascript:void(0)",
            "Download PDF"
        )));
        assert!(!is_download_trigger(&PageElement::anchor("", "Download PDF")));
    }

    #[test]
    fn test_trigger_rejects_supplementary_material() {
        let element = PageElement::anchor("/articles/PMC1/bin/supplement_1.pdf", "Data S1");
        assert!(!is_download_trigger(&element));
        let element = PageElement::anchor("/files/a.pdf", "Appendix (PDF)");
        assert!(!is_download_trigger(&element));
    }

    #[test]
    fn test_trigger_rejects_unrelated_links() {
        assert!(!is_download_trigger(&PageElement::anchor("/about", "About")));
    }

    // ==================== Ranking Tests ====================

    #[test]
    fn test_select_prefers_pdf_path_over_generic_pdf_link() {
        let elements = vec![
            PageElement::anchor("https://cdn.example.org/file.pdf", "file"),
            PageElement::anchor("/articles/PMC9/pdf/", "PDF"),
        ];
        let selected = select_download_element(&elements).unwrap();
        assert_eq!(selected.href.as_deref(), Some("/articles/PMC9/pdf/"));
    }

    #[test]
    fn test_select_keeps_page_order_on_ties() {
        let elements = vec![
            PageElement::anchor("/a/pdf", "first"),
            PageElement::anchor("/b/pdf", "second"),
        ];
        let selected = select_download_element(&elements).unwrap();
        assert_eq!(selected.text, "first");
    }

    #[test]
    fn test_select_aria_label_pdf() {
        let element = PageElement {
            aria_label: Some("PDF download".to_string()),
            ..PageElement::anchor("/render?id=5", "")
        };
        assert_eq!(download_score(&element), 80);
        assert!(is_download_trigger(&element));
    }

    #[test]
    fn test_select_none_when_only_cosmetic() {
        let elements = vec![PageElement {
            class_name: "tooltip".to_string(),
            ..PageElement::anchor("/pdf/", "PDF")
        }];
        assert!(select_download_element(&elements).is_none());
    }

    // ==================== HTML Parsing Tests ====================

    #[test]
    fn test_parse_anchors_reads_attributes_and_text() {
        let html = r#"<p><a class="usa-link" href='/articles/PMC1/pdf/' aria-label="PDF (1 MB)"><span>Download</span> PDF</a></p>"#;
        let anchors = parse_anchors(html);
        assert_eq!(anchors.len(), 1);
        let anchor = &anchors[0];
        assert_eq!(anchor.href.as_deref(), Some("/articles/PMC1/pdf/"));
        assert_eq!(anchor.aria_label.as_deref(), Some("PDF (1 MB)"));
        assert_eq!(anchor.text, "Download PDF");
        assert!(anchor.visible);
    }

    #[test]
    fn test_parse_anchors_detects_hidden() {
        let html = r#"<a href="/x/pdf" hidden>PDF</a><a href="/y/pdf" style="display: none">PDF</a><a href="/z/pdf" aria-hidden="true">PDF</a>"#;
        let anchors = parse_anchors(html);
        assert_eq!(anchors.len(), 3);
        assert!(!anchors[0].visible);
        assert!(!anchors[1].visible);
        assert!(anchors[2].aria_hidden);
    }

    #[test]
    fn test_find_pdf_link_prefers_citation_meta() {
        let page = Url::parse("https://repo.example.org/articles/PMC1/").unwrap();
        let html = r#"<meta name="citation_pdf_url" content="/articles/PMC1/pdf/main.pdf"><a href="/other.pdf">PDF</a>"#;
        assert_eq!(
            find_pdf_link(html, &page).as_deref(),
            Some("https://repo.example.org/articles/PMC1/pdf/main.pdf")
        );
    }

    #[test]
    fn test_find_pdf_link_skips_tooltip_anchor() {
        let page = Url::parse("https://repo.example.org/articles/PMC1/").unwrap();
        let html = r#"
            <a class="usa-tooltip" href="/articles/PMC1/pdf/">PDF</a>
            <a href="/articles/PMC1/pdf/real.pdf">Download PDF</a>
        "#;
        assert_eq!(
            find_pdf_link(html, &page).as_deref(),
            Some("https://repo.example.org/articles/PMC1/pdf/real.pdf")
        );
    }

    #[test]
    fn test_embedded_sources_found() {
        let html = r#"<iframe src="about:blank"></iframe><embed type="application/pdf" src="//mirror.example/files/a.pdf">"#;
        assert_eq!(embedded_sources(html), vec!["//mirror.example/files/a.pdf"]);
    }
}
