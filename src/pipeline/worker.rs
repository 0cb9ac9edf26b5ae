use scraper::Html;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn, Instrument};
use url::Url;

use crate::error::PageError;
use crate::models::{ListingRecord, PageInfo};
use crate::scrapers::extractor::CardExtractor;
use crate::scrapers::fetcher::{PageFetcher, RetryPolicy};
use crate::scrapers::pagination;
use crate::scrapers::traits::TransportFactory;

/// One page of the current search, as handed to a worker
#[derive(Debug, Clone)]
pub struct PageJob {
    pub page: u32,
    pub url: Url,
}

/// Records extracted from one page, in document order
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub page: u32,
    pub records: Vec<ListingRecord>,
    /// Only read on page 1
    pub page_info: Option<PageInfo>,
    pub advertised_total: Option<u64>,
}

/// What workers report back to the scheduler
#[derive(Debug)]
pub enum WorkerEvent {
    Page(Result<PageBatch, PageError>),
    /// The worker could not acquire a transport and has exited
    Down { worker: usize, cause: String },
}

pub type JobQueue = Arc<Mutex<mpsc::Receiver<PageJob>>>;

/// Everything a worker needs besides its transport
pub struct WorkerContext {
    pub factory: Arc<dyn TransportFactory>,
    pub extractor: CardExtractor,
    pub retry: RetryPolicy,
    pub jobs: JobQueue,
    pub events: mpsc::Sender<WorkerEvent>,
    pub cancel: CancellationToken,
}

/// Worker task body: acquire a transport, then process jobs until the queue
/// closes or the run is cancelled. The transport is dropped on every exit
/// path, which releases its session.
pub async fn run(id: usize, ctx: WorkerContext) {
    let span = debug_span!("worker", id);
    async move {
        let transport = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            created = ctx.factory.create(id) => created,
        };
        let transport = match transport {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Worker {} has no transport: {:#}", id, e);
                let _ = ctx
                    .events
                    .send(WorkerEvent::Down {
                        worker: id,
                        cause: format!("{:#}", e),
                    })
                    .await;
                return;
            }
        };

        let mut fetcher = PageFetcher::new(transport, ctx.retry);
        debug!("Worker {} ready ({})", id, fetcher.transport_name());

        loop {
            let job = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                job = async { ctx.jobs.lock().await.recv().await } => job,
            };
            let Some(job) = job else { break };

            let outcome = process(&mut fetcher, &ctx.extractor, &job, &ctx.cancel).await;
            if matches!(outcome, Err(PageError::Cancelled { .. })) {
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                sent = ctx.events.send(WorkerEvent::Page(outcome)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Worker {} stopped", id);
    }
    .instrument(span)
    .await
}

async fn process(
    fetcher: &mut PageFetcher,
    extractor: &CardExtractor,
    job: &PageJob,
    cancel: &CancellationToken,
) -> Result<PageBatch, PageError> {
    debug!("Worker parsing page {}: {}", job.page, job.url);
    let html = fetcher.fetch(job.page, &job.url, cancel).await?;

    if cancel.is_cancelled() {
        return Err(PageError::Cancelled { page: job.page });
    }
    parse_page(extractor, &html, job.page)
}

/// Parse a fetched page into a batch. Pagination is only read on page 1.
pub fn parse_page(
    extractor: &CardExtractor,
    html: &str,
    page: u32,
) -> Result<PageBatch, PageError> {
    let document = Html::parse_document(html);
    let records = extractor.extract(&document, page)?;

    let (page_info, advertised_total) = if page == 1 {
        (
            Some(pagination::analyze(&document)),
            pagination::advertised_total(&document),
        )
    } else {
        (None, None)
    };

    debug!("Collected {} properties from page {}", records.len(), page);
    Ok(PageBatch {
        page,
        records,
        page_info,
        advertised_total,
    })
}
