use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{PageInfo, Termination};
use crate::pipeline::aggregator::{Aggregate, ResultAggregator};
use crate::pipeline::worker::{self, PageJob, WorkerContext, WorkerEvent};
use crate::scrapers::extractor::CardExtractor;
use crate::scrapers::fetcher::RetryPolicy;
use crate::scrapers::site::Site;
use crate::scrapers::traits::TransportFactory;
use crate::scrapers::types::ListingFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Which pages a run may fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePlan {
    /// Pages `1..=n`, dispatched eagerly
    Budget(u32),
    /// Follow pagination from page 1 up to a hard ceiling, dispatching only
    /// as many pages as the remaining record cap can use
    CollectAll { ceiling: u32 },
}

/// Per-run scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pool_size: usize,
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

/// Dispatch bookkeeping; decides whether another page may be queued
#[derive(Debug)]
struct Dispatch {
    plan: PagePlan,
    next_page: u32,
    /// Jobs queued or being processed
    in_flight: u32,
    page_limit: u32,
    first_page_seen: bool,
    /// Largest batch seen so far, used to project collect-all yield
    per_page: usize,
    end_of_results: bool,
    halted: bool,
}

impl Dispatch {
    fn new(plan: PagePlan) -> Self {
        let page_limit = match plan {
            PagePlan::Budget(pages) => pages.max(1),
            PagePlan::CollectAll { ceiling } => ceiling.max(1),
        };
        Self {
            plan,
            next_page: 1,
            in_flight: 0,
            page_limit,
            first_page_seen: false,
            per_page: 0,
            end_of_results: false,
            halted: false,
        }
    }

    fn may_dispatch(&self, collected: usize, max_results: usize) -> bool {
        if self.halted || self.end_of_results || self.next_page > self.page_limit {
            return false;
        }
        match self.plan {
            PagePlan::Budget(_) => true,
            PagePlan::CollectAll { .. } if !self.first_page_seen => self.next_page == 1,
            PagePlan::CollectAll { .. } => {
                let projected = collected + self.in_flight as usize * self.per_page.max(1);
                projected < max_results
            }
        }
    }

    fn dispatched(&mut self) {
        self.next_page += 1;
        self.in_flight += 1;
    }

    fn completed(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn observe(&mut self, page: u32, batch_len: usize, info: Option<PageInfo>) {
        self.per_page = self.per_page.max(batch_len);
        if batch_len == 0 {
            info!("Page {} has no listings, not scheduling further pages", page);
            self.end_of_results = true;
        }
        if page == 1 {
            self.first_page_seen = true;
            if let (PagePlan::CollectAll { ceiling }, Some(info)) = (self.plan, info) {
                self.page_limit = if info.total_pages > 1 {
                    info.total_pages.min(ceiling)
                } else if info.has_next {
                    ceiling
                } else {
                    1
                };
                info!("Total pages: {} (scheduling up to {})", info.total_pages, self.page_limit);
            }
        }
    }

    fn idle(&self, collected: usize, max_results: usize) -> bool {
        self.in_flight == 0 && !self.may_dispatch(collected, max_results)
    }
}

/// Runs one scrape over a fixed pool of workers.
///
/// The scheduler is also the single owner of the [`ResultAggregator`]: workers
/// only talk to it through the job queue and the event channel.
pub struct PageScheduler {
    factory: Arc<dyn TransportFactory>,
    extractor: CardExtractor,
    site: Site,
    origin: String,
    settings: SchedulerSettings,
}

impl PageScheduler {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        extractor: CardExtractor,
        site: Site,
        origin: impl Into<String>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            factory,
            extractor,
            site,
            origin: origin.into(),
            settings,
        }
    }

    pub async fn run(
        &self,
        filter: &ListingFilter,
        plan: PagePlan,
        max_results: usize,
    ) -> Aggregate {
        let pool_size = self.settings.pool_size.max(1);
        let cancel = CancellationToken::new();
        let (job_tx, job_rx) = mpsc::channel::<PageJob>(pool_size * 2);
        let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(pool_size * 2);
        let jobs = Arc::new(Mutex::new(job_rx));

        let mut workers = JoinSet::new();
        for id in 0..pool_size {
            let ctx = WorkerContext {
                factory: Arc::clone(&self.factory),
                extractor: self.extractor.clone(),
                retry: self.settings.retry,
                jobs: Arc::clone(&jobs),
                events: event_tx.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker::run(id, ctx));
        }
        drop(event_tx);

        let mut aggregator = ResultAggregator::new(max_results);
        let mut dispatch = Dispatch::new(plan);
        let mut live_workers = pool_size;
        self.fill_queue(filter, &job_tx, &mut dispatch, &aggregator, max_results);

        let deadline = tokio::time::sleep(self.settings.deadline);
        tokio::pin!(deadline);

        let termination = loop {
            if dispatch.idle(aggregator.len(), max_results) {
                break if dispatch.end_of_results {
                    Termination::EndOfResults
                } else {
                    Termination::Exhausted
                };
            }

            tokio::select! {
                biased;
                _ = &mut deadline => {
                    warn!(
                        "Deadline of {:?} elapsed, returning {} collected properties",
                        self.settings.deadline,
                        aggregator.len()
                    );
                    break Termination::Deadline;
                }
                event = event_rx.recv() => match event {
                    None => break Termination::Exhausted,
                    Some(WorkerEvent::Page(Ok(batch))) => {
                        dispatch.completed();
                        dispatch.observe(batch.page, batch.records.len(), batch.page_info);
                        aggregator.accept(batch);
                        if aggregator.is_full() {
                            info!("Reached limit of {} properties, stopping parsing", max_results);
                            break Termination::CapReached;
                        }
                    }
                    Some(WorkerEvent::Page(Err(e))) => {
                        dispatch.completed();
                        aggregator.record_failure(&e);
                    }
                    Some(WorkerEvent::Down { worker, cause }) => {
                        live_workers -= 1;
                        if live_workers == 0 {
                            error!("All workers are down, last: worker {}", worker);
                            aggregator.record_fatal(cause);
                            break Termination::Exhausted;
                        }
                    }
                },
            }

            self.fill_queue(filter, &job_tx, &mut dispatch, &aggregator, max_results);
        };

        // In-flight pages are abandoned. Workers get a short grace period to
        // abort their requests before the remaining tasks are torn down.
        cancel.cancel();
        drop(job_tx);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!("Workers still busy after {:?}, aborting", SHUTDOWN_GRACE);
        }
        workers.shutdown().await;

        aggregator.finish(termination)
    }

    fn fill_queue(
        &self,
        filter: &ListingFilter,
        job_tx: &mpsc::Sender<PageJob>,
        dispatch: &mut Dispatch,
        aggregator: &ResultAggregator,
        max_results: usize,
    ) {
        while dispatch.may_dispatch(aggregator.len(), max_results) {
            let page = dispatch.next_page;
            let url = match self.site.search_url(&self.origin, filter, page) {
                Ok(url) => url,
                Err(e) => {
                    error!("Cannot build URL for page {}: {}", page, e);
                    dispatch.halted = true;
                    break;
                }
            };
            match job_tx.try_send(PageJob { page, url }) {
                Ok(()) => dispatch.dispatched(),
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Closed(_)) => {
                    dispatch.halted = true;
                    break;
                }
            }
        }
    }
}
