//! [`BrowserDriver`] backed by a headless Chromium via the DevTools protocol.
//!
//! The browser is launched lazily on first use and shared by every attempt.
//! Each attempt gets its own page (tab); pages are closed when dropped.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{BrowserDriver, BrowserOptions, BrowserPage};
use crate::source::page::PageElement;
use crate::source::{RawArtifact, SourceError};

const LAUNCH_ARGS: &[&str] = &["--disable-gpu", "--no-sandbox", "--disable-dev-shm-usage"];

/// Collects links and buttons with the attributes the download predicate needs.
const ELEMENTS_SCRIPT: &str = r"
(() => Array.from(document.querySelectorAll('a, button, [role=button]')).map(el => {
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    return {
        tag: el.tagName.toLowerCase(),
        href: el.getAttribute('href'),
        text: (el.innerText || el.textContent || '').trim(),
        ariaLabel: el.getAttribute('aria-label'),
        className: typeof el.className === 'string' ? el.className : '',
        id: el.id || '',
        role: el.getAttribute('role'),
        visible: style.display !== 'none' && style.visibility !== 'hidden'
            && rect.width > 0 && rect.height > 0,
        ariaHidden: el.getAttribute('aria-hidden') === 'true'
    };
}))()
";

/// Pumps CDP events until the browser connection closes.
///
/// Per-event errors are logged and skipped. Returns the number of events seen.
async fn drain_events<S, E>(mut events: S) -> usize
where
    S: Stream<Item = Result<(), E>> + Unpin,
    E: std::fmt::Display,
{
    let mut seen = 0;
    while let Some(event) = events.next().await {
        seen += 1;
        if let Err(error) = event {
            debug!(error = %error, "browser event error");
        }
    }
    seen
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchedBody {
    status: u16,
    content_type: Option<String>,
    url: String,
    body_base64: String,
}

/// Chromium-backed driver.
pub struct ChromiumDriver {
    options: BrowserOptions,
    browser: OnceCell<Browser>,
}

impl std::fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumDriver")
            .field("options", &self.options)
            .field("launched", &self.browser.initialized())
            .finish()
    }
}

impl ChromiumDriver {
    /// Creates a driver; nothing is launched until the first page is opened.
    #[must_use]
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            browser: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<&Browser, SourceError> {
        self.browser.get_or_try_init(|| self.launch()).await
    }

    async fn launch(&self) -> Result<Browser, SourceError> {
        let mut builder = BrowserConfig::builder()
            .args(LAUNCH_ARGS.to_vec())
            .request_timeout(self.options.navigation_timeout);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| SourceError::unsupported(format!("browser configuration invalid: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| SourceError::unsupported(format!("browser launch failed: {e}")))?;

        tokio::spawn(drain_events(handler));

        info!(headless = self.options.headless, "browser launched");
        Ok(browser)
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self, url: &str) -> Result<Box<dyn BrowserPage>, SourceError> {
        let browser = self.browser().await?;
        let navigation = async {
            let page = browser
                .new_page(url)
                .await
                .map_err(|e| SourceError::network(url, e))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| SourceError::network(url, e))?;
            Ok::<_, SourceError>(page)
        };

        let page = tokio::time::timeout(self.options.navigation_timeout, navigation)
            .await
            .map_err(|_| {
                SourceError::timeout(format!(
                    "navigation to {url} exceeded {}s",
                    self.options.navigation_timeout.as_secs()
                ))
            })??;

        debug!(url, "page loaded");
        Ok(Box::new(ChromiumPage { page }))
    }
}

struct ChromiumPage {
    page: Page,
}

fn decode_body(encoded: &str, url: &str) -> Result<Vec<u8>, SourceError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| SourceError::network(url, format!("undecodable page body: {e}")))
}

impl ChromiumPage {
    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, SourceError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(SourceError::unsupported)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| SourceError::network("browser", e))?;
        result
            .into_value()
            .map_err(|e| SourceError::network("browser", format!("unexpected script result: {e}")))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn elements(&self) -> Result<Vec<PageElement>, SourceError> {
        self.evaluate(ELEMENTS_SCRIPT.to_string()).await
    }

    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<RawArtifact, SourceError> {
        let url_literal = serde_json::to_string(url)
            .map_err(|e| SourceError::unsupported(format!("unencodable URL: {e}")))?;
        let limit = max_bytes.saturating_add(1);
        let script = format!(
            r"
(async () => {{
    const response = await fetch({url_literal}, {{ credentials: 'include' }});
    const blob = (await response.blob()).slice(0, {limit});
    const dataUrl = await new Promise((resolve, reject) => {{
        const reader = new FileReader();
        reader.onload = () => resolve(reader.result);
        reader.onerror = () => reject(reader.error);
        reader.readAsDataURL(blob);
    }});
    return {{
        status: response.status,
        contentType: response.headers.get('content-type'),
        url: response.url,
        bodyBase64: dataUrl.slice(dataUrl.indexOf(',') + 1)
    }};
}})()
"
        );

        let body: FetchedBody = self.evaluate(script).await?;
        match body.status {
            200..=299 => Ok(RawArtifact {
                bytes: decode_body(&body.body_base64, url)?,
                content_type: body.content_type,
                url: body.url,
            }),
            404 | 410 => Err(SourceError::not_found(format!("HTTP {} from {url}", body.status))),
            429 => Err(SourceError::rate_limited(url, None)),
            status => Err(SourceError::http_status(url, status)),
        }
    }

    async fn close(self: Box<Self>) {}
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        let page = self.page.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(error) = page.close().await {
                    warn!(error = %error, "failed to close browser page");
                }
            });
        }
    }
}
