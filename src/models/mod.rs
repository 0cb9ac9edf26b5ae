use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scrapers::types::ListingFilter;

/// One scraped listing, as returned to API clients and posted to the webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub price: i64,
    pub currency: String,
    pub address: String,
    pub rooms: Option<u32>,
    pub area: Option<f64>,
    pub floor: Option<i32>,
    pub total_floors: Option<i32>,
    pub build_year: Option<i32>,
    pub images: Vec<String>,
    pub description: String,
    pub url: String,
    pub phone: String,
    pub is_new_building: bool,
    pub building_type: String,
    pub seller_type: String,
    pub kitchen_area: Option<f64>,
    pub residential_complex: String,
}

impl ListingRecord {
    /// A record is worth keeping only with a title and a positive price
    pub fn is_retainable(&self) -> bool {
        !self.title.trim().is_empty() && self.price > 0
    }
}

/// Terminal status of a scrape run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Which condition ended the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every schedulable page was fetched and all workers went idle
    Exhausted,
    /// The record cap was reached
    CapReached,
    /// The wall-clock deadline elapsed
    Deadline,
    /// A page came back empty, so no further pages were scheduled
    EndOfResults,
}

/// Pagination info read from the first page of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    pub total_pages: u32,
    pub has_next: bool,
}

impl Default for PageInfo {
    fn default() -> Self {
        Self {
            total_pages: 1,
            has_next: false,
        }
    }
}

/// A page that could not be turned into a batch of records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageFailure {
    pub page: u32,
    pub cause: String,
}

/// Aggregate outcome of one scrape invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub filter: ListingFilter,
    pub page_budget: u32,
    pub collect_all_pages: bool,
    pub caller: Option<String>,
    pub records: Vec<ListingRecord>,
    pub total_estimate: u64,
    pub page_info: Option<PageInfo>,
    pub pages_succeeded: u32,
    pub pages_failed: Vec<PageFailure>,
    pub status: RunStatus,
    pub termination: Termination,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScrapeRun {
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn records_with_images(&self) -> usize {
        self.records.iter().filter(|r| !r.images.is_empty()).count()
    }
}
