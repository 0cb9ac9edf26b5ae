use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use crate::scrapers::traits::{Transport, TransportFactory};

/// Element that signals the result list has rendered
const CARD_WAIT_SELECTOR: &str = ".a-card, [data-cy='l-card'], [data-testid='l-card']";

/// Browser-backed transport using headless Chrome.
///
/// The browser process lives exactly as long as this value: dropping the
/// transport (normal exit, error, or an aborted worker task) shuts Chrome down.
pub struct BrowserTransport {
    browser: Browser,
    tab: Arc<Tab>,
    page_load_timeout: Duration,
    element_wait: Duration,
}

impl BrowserTransport {
    /// Launch a headless Chrome with one tab. Blocks while Chrome starts.
    pub fn launch(page_load_timeout: Duration, element_wait: Duration) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((1280, 720)))
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
        let tab = open_tab(&browser, page_load_timeout)?;

        Ok(Self {
            browser,
            tab,
            page_load_timeout,
            element_wait,
        })
    }
}

fn open_tab(browser: &Browser, page_load_timeout: Duration) -> Result<Arc<Tab>> {
    let tab = browser.new_tab().context("Failed to open browser tab")?;
    tab.set_default_timeout(page_load_timeout);
    Ok(tab)
}

/// Close `tab` and open a replacement. Blocks on CDP round-trips.
fn reset_tab(browser: &Browser, tab: &Tab, page_load_timeout: Duration) -> Result<Arc<Tab>> {
    if let Err(e) = tab.close(true) {
        warn!("Failed to close browser tab: {}", e);
    }
    open_tab(browser, page_load_timeout)
}

/// Navigate and return the rendered document. Runs on a blocking thread.
fn render(tab: &Tab, url: &str, element_wait: Duration) -> Result<String> {
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;

    if tab
        .wait_for_element_with_custom_timeout(CARD_WAIT_SELECTOR, element_wait)
        .is_err()
    {
        debug!("No listing cards rendered within {:?}", element_wait);
    }

    // Accept cookies if present
    let _ = tab.evaluate(
        r#"
        const button = document.querySelector('button[id*="accept"], button[class*="cookie"]');
        if (button) button.click();
        "#,
        false,
    );

    let html = tab
        .evaluate("document.documentElement.outerHTML", false)?
        .value
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    Ok(html)
}

#[async_trait]
impl Transport for BrowserTransport {
    async fn load(&mut self, url: &Url) -> Result<String, FetchError> {
        let tab = Arc::clone(&self.tab);
        let target = url.to_string();
        let element_wait = self.element_wait;

        let html = tokio::task::spawn_blocking(move || render(&tab, &target, element_wait))
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?
            .map_err(|e| {
                if e.to_string().to_lowercase().contains("timeout") {
                    FetchError::Timeout(self.page_load_timeout)
                } else {
                    FetchError::Browser(e.to_string())
                }
            })?;

        if html.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(html)
    }

    async fn abort(&mut self) {
        // Closing the tab stops the abandoned navigation; a fresh tab serves
        // the next page.
        let tab = Arc::clone(&self.tab);
        let browser = self.browser.clone();
        let page_load_timeout = self.page_load_timeout;

        let reopened = tokio::task::spawn_blocking(move || {
            reset_tab(&browser, &tab, page_load_timeout)
        })
        .await
        .context("Tab reset task failed")
        .and_then(|result| result);
        match reopened {
            Ok(tab) => self.tab = tab,
            Err(e) => warn!("Failed to reset browser tab: {:#}", e),
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// Launches one browser per worker
pub struct BrowserTransportFactory {
    page_load_timeout: Duration,
    element_wait: Duration,
}

impl BrowserTransportFactory {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            page_load_timeout: config.request_timeout,
            element_wait: config.element_wait,
        }
    }
}

#[async_trait]
impl TransportFactory for BrowserTransportFactory {
    async fn create(&self, worker: usize) -> anyhow::Result<Box<dyn Transport>> {
        let page_load_timeout = self.page_load_timeout;
        let element_wait = self.element_wait;

        let transport = tokio::task::spawn_blocking(move || {
            BrowserTransport::launch(page_load_timeout, element_wait)
        })
        .await
        .context("Browser launch task failed")?
        .with_context(|| format!("Worker {} could not start a browser", worker))?;

        Ok(Box::new(transport))
    }
}
