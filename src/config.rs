use anyhow::{bail, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::scrapers::site::Site;

/// Largest page budget a caller may request
pub const MAX_PAGE_BUDGET: u32 = 10;

/// Which transport workers use to load listing pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain HTTP GET plus HTML parsing
    Http,
    /// Headless Chrome, for pages that need JavaScript
    Browser,
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "browser" | "chrome" => Ok(TransportKind::Browser),
            other => bail!("unknown transport '{}'", other),
        }
    }
}

/// Scraper settings shared by every run of one [`crate::Scraper`]
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub site: Site,
    /// Overrides the site's public origin (used for mirrors and tests)
    pub base_url: Option<String>,
    pub transport: TransportKind,
    /// Standard pool size; rate-sensitive sites get a third of it
    pub workers: usize,
    /// Runaway guard for collect-all runs
    pub max_pages: u32,
    pub deadline: Duration,
    pub max_cards_per_page: usize,
    pub max_images: usize,
    /// Additional attempts after the first failed one
    pub retries: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    /// How long the browser transport waits for card elements to appear
    pub element_wait: Duration,
    pub user_agent: String,
    pub webhook_url: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            site: Site::Krisha,
            base_url: None,
            transport: TransportKind::Http,
            workers: 12,
            max_pages: 50,
            deadline: Duration::from_secs(300),
            max_cards_per_page: 20,
            max_images: 10,
            retries: 2,
            retry_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            element_wait: Duration::from_secs(2),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            webhook_url: None,
        }
    }
}

impl ScraperConfig {
    /// Defaults overridden by `SCOUT_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(site) = var("SCOUT_SITE") {
            config.site = site.parse()?;
        }
        config.base_url = var("SCOUT_BASE_URL");
        if let Some(transport) = var("SCOUT_TRANSPORT") {
            config.transport = transport.parse()?;
        }
        if let Some(workers) = parsed::<usize>("SCOUT_WORKERS")? {
            config.workers = workers.max(1);
        }
        if let Some(max_pages) = parsed::<u32>("SCOUT_MAX_PAGES")? {
            config.max_pages = max_pages.max(1);
        }
        if let Some(secs) = parsed::<u64>("SCOUT_DEADLINE_SECS")? {
            config.deadline = Duration::from_secs(secs);
        }
        if let Some(cards) = parsed::<usize>("SCOUT_MAX_CARDS")? {
            config.max_cards_per_page = cards.max(1);
        }
        if let Some(retries) = parsed::<u32>("SCOUT_RETRIES")? {
            config.retries = retries;
        }
        config.webhook_url = var("SCOUT_WEBHOOK_URL");

        Ok(config)
    }

    /// Number of concurrent workers for this configuration
    pub fn pool_size(&self) -> usize {
        let workers = self.workers.max(1);
        if self.site.is_rate_sensitive() {
            (workers / 3).max(1)
        } else {
            workers
        }
    }

    /// Origin that search URLs are built against
    pub fn origin(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.site.default_origin())
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} has invalid value '{}'", name, raw))
        })
        .transpose()
}
