use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::PageError;
use crate::models::{ListingRecord, PageFailure, PageInfo, RunStatus, Termination};
use crate::pipeline::worker::PageBatch;
use crate::scrapers::pagination;

/// How one batch was merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Merge {
    pub added: usize,
    pub duplicates: usize,
    /// Records discarded because the cap was already reached
    pub overflow: usize,
}

/// Final, frozen view of what the aggregator collected
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub records: Vec<ListingRecord>,
    pub total_estimate: u64,
    pub page_info: Option<PageInfo>,
    pub pages_succeeded: u32,
    pub pages_failed: Vec<PageFailure>,
    pub status: RunStatus,
    pub termination: Termination,
    pub error: Option<String>,
}

/// Merges page batches in arrival order, deduplicating by listing id and
/// truncating at the record cap.
#[derive(Debug)]
pub struct ResultAggregator {
    max_results: usize,
    records: Vec<ListingRecord>,
    seen: HashSet<String>,
    pages_succeeded: u32,
    failures: Vec<PageFailure>,
    fatal: Option<String>,
    page_info: Option<PageInfo>,
    advertised_total: Option<u64>,
}

impl ResultAggregator {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results,
            records: Vec::new(),
            seen: HashSet::new(),
            pages_succeeded: 0,
            failures: Vec::new(),
            fatal: None,
            page_info: None,
            advertised_total: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_results
    }

    pub fn pages_succeeded(&self) -> u32 {
        self.pages_succeeded
    }

    pub fn accept(&mut self, batch: PageBatch) -> Merge {
        self.pages_succeeded += 1;
        if batch.page_info.is_some() {
            self.page_info = batch.page_info;
        }
        if batch.advertised_total.is_some() {
            self.advertised_total = batch.advertised_total;
        }

        let mut merge = Merge::default();
        for record in batch.records {
            if self.is_full() {
                merge.overflow += 1;
                continue;
            }
            if !self.seen.insert(record.id.clone()) {
                merge.duplicates += 1;
                continue;
            }
            self.records.push(record);
            merge.added += 1;
        }

        debug!(
            "Merged page {}: +{} ({} duplicates, {} over cap), total: {}",
            batch.page,
            merge.added,
            merge.duplicates,
            merge.overflow,
            self.records.len()
        );
        merge
    }

    pub fn record_failure(&mut self, error: &PageError) {
        warn!("Page parsing error: {}", error);
        self.failures.push(PageFailure {
            page: error.page(),
            cause: error.to_string(),
        });
    }

    /// A condition that prevented the run from fetching at all
    pub fn record_fatal(&mut self, cause: impl Into<String>) {
        self.fatal.get_or_insert_with(|| cause.into());
    }

    pub fn finish(self, termination: Termination) -> Aggregate {
        let (status, error) = self.status(termination);
        let total_estimate =
            pagination::estimate_total(self.advertised_total, self.page_info, self.records.len());

        let mut pages_failed = self.failures;
        pages_failed.sort_by_key(|f| f.page);

        if status == RunStatus::Failed {
            warn!("Scrape failed: {}", error.as_deref().unwrap_or("unknown cause"));
        } else {
            info!(
                "Aggregated {} records from {} pages ({} failed)",
                self.records.len(),
                self.pages_succeeded,
                pages_failed.len()
            );
        }

        Aggregate {
            records: self.records,
            total_estimate,
            page_info: self.page_info,
            pages_succeeded: self.pages_succeeded,
            pages_failed,
            status,
            termination,
            error,
        }
    }

    fn status(&self, termination: Termination) -> (RunStatus, Option<String>) {
        if self.pages_succeeded == 0 {
            let cause = self
                .failures
                .iter()
                .min_by_key(|f| f.page)
                .map(|f| f.cause.clone())
                .or_else(|| self.fatal.clone())
                .or_else(|| {
                    (termination == Termination::Deadline)
                        .then(|| "deadline elapsed before any page completed".to_string())
                });
            if let Some(cause) = cause {
                return (RunStatus::Failed, Some(cause));
            }
        }

        if termination == Termination::Deadline && !self.records.is_empty() {
            return (RunStatus::Partial, None);
        }
        (RunStatus::Completed, None)
    }
}
