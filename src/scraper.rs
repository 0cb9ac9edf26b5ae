use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use url::Url;

use crate::config::{ScraperConfig, TransportKind, MAX_PAGE_BUDGET};
use crate::error::ScrapeError;
use crate::models::{RunStatus, ScrapeRun};
use crate::notify::{build_webhook_client, WebhookNotifier};
use crate::pipeline::{PagePlan, PageScheduler, SchedulerSettings};
use crate::scrapers::browser::BrowserTransportFactory;
use crate::scrapers::extractor::CardExtractor;
use crate::scrapers::fetcher::RetryPolicy;
use crate::scrapers::http::{build_client, HttpTransportFactory};
use crate::scrapers::traits::TransportFactory;
use crate::scrapers::types::ListingFilter;

/// Entry point of the scraping core: one instance per configuration,
/// any number of concurrent `scrape` calls.
pub struct Scraper {
    config: ScraperConfig,
    factory: Arc<dyn TransportFactory>,
    notifier: Option<WebhookNotifier>,
}

impl Scraper {
    /// Build a scraper with the transport named in `config`
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let factory: Arc<dyn TransportFactory> = match config.transport {
            TransportKind::Http => {
                Arc::new(HttpTransportFactory::new(build_client(&config)?, &config))
            }
            TransportKind::Browser => Arc::new(BrowserTransportFactory::new(&config)),
        };
        Self::with_transport(config, factory)
    }

    /// Build a scraper around a custom transport
    pub fn with_transport(
        config: ScraperConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        let notifier = match config.webhook_url.as_ref() {
            Some(url) => Some(WebhookNotifier::new(
                build_webhook_client(&config)?,
                url.clone(),
            )),
            None => None,
        };
        Ok(Self {
            config,
            factory,
            notifier,
        })
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Wait for background webhook deliveries to finish
    pub async fn flush_notifications(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.flush().await;
        }
    }

    /// Run one search.
    ///
    /// Only a structurally invalid filter is an `Err`; every other failure is
    /// reported through the returned run's status.
    pub async fn scrape(
        &self,
        filter: &ListingFilter,
        page_budget: u32,
        caller: Option<&str>,
    ) -> Result<ScrapeRun, ScrapeError> {
        filter.validate()?;
        let origin = Url::parse(self.config.origin())?;
        // Fail before any worker starts if the search URL cannot be built
        self.config.site.search_url(origin.as_str(), filter, 1)?;

        let span = info_span!(
            "scrape",
            caller = caller.unwrap_or("anonymous"),
            city = %filter.city
        );
        self.run(filter, page_budget, caller, origin).instrument(span).await
    }

    async fn run(
        &self,
        filter: &ListingFilter,
        page_budget: u32,
        caller: Option<&str>,
        origin: Url,
    ) -> Result<ScrapeRun, ScrapeError> {
        let started_at = Utc::now();
        let page_budget = page_budget.clamp(1, MAX_PAGE_BUDGET);
        for field in filter.inverted_ranges() {
            warn!("Filter range {} has min > max, passing it through unchanged", field);
        }

        let (plan, max_results) = if filter.collect_all_pages {
            (
                PagePlan::CollectAll {
                    ceiling: self.config.max_pages,
                },
                filter.effective_max_results(),
            )
        } else {
            (PagePlan::Budget(page_budget), usize::MAX)
        };

        let pool_size = self.config.pool_size();
        info!(
            "Starting {} scrape: {} {} (rooms: {:?}, price: {:?}..{:?}), {:?}, {} workers",
            self.config.site.name(),
            filter.property_type.as_str(),
            filter.city,
            filter.rooms,
            filter.price_from,
            filter.price_to,
            plan,
            pool_size
        );

        let extractor = CardExtractor::new(
            origin.clone(),
            self.config.site.name(),
            self.config.max_cards_per_page,
            self.config.max_images,
        );
        let scheduler = PageScheduler::new(
            Arc::clone(&self.factory),
            extractor,
            self.config.site,
            origin.as_str(),
            SchedulerSettings {
                pool_size,
                deadline: self.config.deadline,
                retry: RetryPolicy {
                    retries: self.config.retries,
                    backoff: self.config.retry_backoff,
                },
            },
        );

        let aggregate = scheduler.run(filter, plan, max_results).await;

        let run = ScrapeRun {
            filter: filter.clone(),
            page_budget,
            collect_all_pages: filter.collect_all_pages,
            caller: caller.map(str::to_string),
            records: aggregate.records,
            total_estimate: aggregate.total_estimate,
            page_info: aggregate.page_info,
            pages_succeeded: aggregate.pages_succeeded,
            pages_failed: aggregate.pages_failed,
            status: aggregate.status,
            termination: aggregate.termination,
            error: aggregate.error,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "Scrape {}: {} properties ({} with images), total estimate {}, \
             {} pages ok, {} failed, took {}ms",
            run.status.as_str(),
            run.count(),
            run.records_with_images(),
            run.total_estimate,
            run.pages_succeeded,
            run.pages_failed.len(),
            (run.finished_at - run.started_at).num_milliseconds()
        );

        if run.status == RunStatus::Completed && !run.records.is_empty() {
            if let Some(notifier) = &self.notifier {
                notifier.notify(filter, run.records.clone());
            }
        }

        Ok(run)
    }
}
