mod common;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use estate_scout::scrapers::traits::{Transport, TransportFactory};
use estate_scout::{
    FetchError, ListingFilter, RunStatus, ScrapeError, Scraper, ScraperConfig, Termination,
};

use common::{cards, empty_page, paginator, results_page, test_config};

const ORIGIN: &str = "https://krisha.test";

#[derive(Clone)]
enum Reply {
    Html(String),
    Status(u16),
    Slow(Duration, String),
}

/// In-memory listing site keyed by page number
#[derive(Default)]
struct FakeSite {
    pages: HashMap<u32, Reply>,
    requests: Mutex<Vec<u32>>,
    aborts: AtomicUsize,
}

impl FakeSite {
    fn with_pages(pages: impl IntoIterator<Item = (u32, Reply)>) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.into_iter().collect(),
            ..Self::default()
        })
    }

    fn requested(&self) -> Vec<u32> {
        let mut pages = self.requests.lock().unwrap().clone();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    fn attempts(&self, page: u32) -> usize {
        self.requests.lock().unwrap().iter().filter(|p| **p == page).count()
    }
}

struct FakeTransport {
    site: Arc<FakeSite>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn load(&mut self, url: &Url) -> Result<String, FetchError> {
        let page = url
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(1);
        self.site.requests.lock().unwrap().push(page);

        match self.site.pages.get(&page).cloned() {
            Some(Reply::Html(html)) => Ok(html),
            Some(Reply::Status(code)) => Err(FetchError::Status(code)),
            Some(Reply::Slow(delay, html)) => {
                tokio::time::sleep(delay).await;
                Ok(html)
            }
            None => Err(FetchError::Status(404)),
        }
    }

    async fn abort(&mut self) {
        self.site.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeFactory {
    site: Arc<FakeSite>,
    broken: bool,
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, worker: usize) -> anyhow::Result<Box<dyn Transport>> {
        if self.broken {
            anyhow::bail!("no session available for worker {}", worker);
        }
        Ok(Box::new(FakeTransport {
            site: Arc::clone(&self.site),
        }))
    }
}

fn scraper(site: &Arc<FakeSite>, config: ScraperConfig) -> Scraper {
    let factory = Arc::new(FakeFactory {
        site: Arc::clone(site),
        broken: false,
    });
    Scraper::with_transport(config, factory).unwrap()
}

fn page(prefix: &str, count: usize, total_pages: u32) -> Reply {
    Reply::Html(results_page(&cards(prefix, count), &paginator(total_pages)))
}

fn ids(records: &[estate_scout::ListingRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn collect_all_stops_at_cap_without_fetching_page_three() {
    let site = FakeSite::with_pages([
        (1, page("p1-", 5, 3)),
        (2, page("p2-", 5, 3)),
        (3, page("p3-", 5, 3)),
    ]);
    let filter: ListingFilter = serde_json::from_value(serde_json::json!({
        "city": "almaty",
        "rooms": 2,
        "priceTo": 40_000_000,
        "collectAllPages": true,
        "maxResults": 6
    }))
    .unwrap();

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&filter, 1, Some("test"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.termination, Termination::CapReached);
    assert_eq!(run.count(), 6);
    assert!(run.records.iter().all(|r| r.id.starts_with("p1-") || r.id.starts_with("p2-")));
    assert_eq!(site.requested(), vec![1, 2]);
    assert_eq!(run.total_estimate, 5);
}

#[tokio::test]
async fn overlapping_pages_keep_first_occurrence() {
    let overlap = format!("{}{}", cards("a", 1), cards("b", 2));
    let site = FakeSite::with_pages([
        (1, page("a", 3, 2)),
        (2, Reply::Html(results_page(&overlap, &paginator(2)))),
    ]);

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 2, None)
        .await
        .unwrap();

    let mut found = ids(&run.records);
    found.sort_unstable();
    assert_eq!(found, vec!["a1", "a2", "a3", "b1", "b2"]);
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn failed_middle_page_does_not_fail_the_run() {
    let site = FakeSite::with_pages([
        (1, page("p1-", 3, 5)),
        (2, Reply::Status(503)),
        (3, page("p3-", 3, 5)),
        (4, page("p4-", 3, 5)),
        (5, page("p5-", 3, 5)),
    ]);

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 5, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.error, None);
    assert_eq!(run.count(), 12);
    assert!(!run.records.iter().any(|r| r.id.starts_with("p2-")));
    assert_eq!(run.pages_succeeded, 4);
    assert_eq!(run.pages_failed.len(), 1);
    assert_eq!(run.pages_failed[0].page, 2);
    // One attempt plus two retries
    assert_eq!(site.attempts(2), 3);
}

#[tokio::test]
async fn every_page_failing_fails_the_run() {
    let site = FakeSite::with_pages([(1, Reply::Status(500)), (2, Reply::Status(502))]);

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 2, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.records.is_empty());
    let cause = run.error.unwrap();
    assert!(cause.starts_with("page 1:"), "unexpected cause: {}", cause);
    assert!(cause.contains("500"));
}

#[tokio::test]
async fn page_without_listing_container_is_a_page_failure() {
    let maintenance = "<html><body>Технические работы</body></html>";
    let site = FakeSite::with_pages([(1, Reply::Html(maintenance.into()))]);

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 1, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.pages_failed.len(), 1);
    // Not a fetch problem, so no retries
    assert_eq!(site.attempts(1), 1);
}

#[tokio::test]
async fn deadline_returns_partial_results_and_aborts_in_flight_pages() {
    let slow = results_page(&cards("late", 3), "");
    let site = FakeSite::with_pages([
        (1, page("p1-", 4, 3)),
        (2, Reply::Slow(Duration::from_secs(30), slow.clone())),
        (3, Reply::Slow(Duration::from_secs(30), slow)),
    ]);
    let config = ScraperConfig {
        deadline: Duration::from_millis(300),
        ..test_config(ORIGIN)
    };

    let started = std::time::Instant::now();
    let run = scraper(&site, config)
        .scrape(&ListingFilter::for_city("almaty"), 3, None)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.termination, Termination::Deadline);
    assert_eq!(run.count(), 4);
    assert!(site.aborts.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn empty_page_ends_the_result_set() {
    let mut pages: Vec<(u32, Reply)> = vec![(1, page("p1-", 2, 10)), (2, page("p2-", 2, 10))];
    pages.extend((3..=10).map(|n| (n, Reply::Html(empty_page()))));
    let site = FakeSite::with_pages(pages);
    let config = ScraperConfig {
        workers: 1,
        ..test_config(ORIGIN)
    };

    let run = scraper(&site, config)
        .scrape(&ListingFilter::for_city("almaty"), 10, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.termination, Termination::EndOfResults);
    assert_eq!(run.count(), 4);
    assert!(!site.requested().contains(&10));
}

#[tokio::test]
async fn budget_bounds_pages_fetched() {
    let site = FakeSite::with_pages((1..=5).map(|n| (n, page(&format!("p{}-", n), 5, 5))));

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 2, None)
        .await
        .unwrap();

    assert_eq!(site.requested(), vec![1, 2]);
    assert_eq!(run.count(), 10);
    assert_eq!(run.termination, Termination::Exhausted);

    let site = FakeSite::with_pages([(1, page("p1-", 5, 5))]);
    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("almaty"), 0, None)
        .await
        .unwrap();
    assert_eq!(run.page_budget, 1);
    assert_eq!(site.requested(), vec![1]);
}

#[tokio::test]
async fn collect_all_follows_pagination_to_the_last_page() {
    let site = FakeSite::with_pages((1..=3).map(|n| (n, page(&format!("p{}-", n), 4, 3))));
    let filter = ListingFilter {
        collect_all_pages: true,
        ..ListingFilter::for_city("almaty")
    };

    let run = scraper(&site, test_config(ORIGIN))
        .scrape(&filter, 1, None)
        .await
        .unwrap();

    assert_eq!(site.requested(), vec![1, 2, 3]);
    assert_eq!(run.count(), 12);
    assert_eq!(run.termination, Termination::Exhausted);
    assert_eq!(run.page_info.map(|info| info.total_pages), Some(3));
}

#[tokio::test]
async fn missing_city_fails_fast() {
    let site = FakeSite::with_pages([(1, page("p1-", 1, 1))]);

    let result = scraper(&site, test_config(ORIGIN))
        .scrape(&ListingFilter::for_city("  "), 1, None)
        .await;

    assert!(matches!(result, Err(ScrapeError::InvalidFilter(_))));
    assert!(site.requested().is_empty());
}

#[tokio::test]
async fn no_transport_for_any_worker_fails_the_run() {
    let site = FakeSite::with_pages([(1, page("p1-", 1, 1))]);
    let factory = Arc::new(FakeFactory {
        site: Arc::clone(&site),
        broken: true,
    });
    let scraper = Scraper::with_transport(test_config(ORIGIN), factory).unwrap();

    let run = scraper
        .scrape(&ListingFilter::for_city("almaty"), 3, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("no session available"));
    assert!(site.requested().is_empty());
}

#[tokio::test]
async fn partial_run_is_not_forwarded() {
    let mut sink = mockito::Server::new_async().await;
    let hook = sink.mock("POST", "/hook").expect(0).create_async().await;

    let site = FakeSite::with_pages([
        (1, page("p1-", 2, 2)),
        (2, Reply::Slow(Duration::from_secs(30), empty_page())),
    ]);
    let config = ScraperConfig {
        deadline: Duration::from_millis(200),
        webhook_url: Some(format!("{}/hook", sink.url())),
        ..test_config(ORIGIN)
    };
    let scout = scraper(&site, config);

    let run = scout
        .scrape(&ListingFilter::for_city("almaty"), 2, None)
        .await
        .unwrap();
    scout.flush_notifications().await;

    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.count(), 2);
    hook.assert_async().await;
}
