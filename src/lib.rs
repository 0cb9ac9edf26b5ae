pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod scraper;
pub mod scrapers;

pub use config::{ScraperConfig, TransportKind};
pub use error::{FetchError, PageError, ScrapeError};
pub use models::{ListingRecord, RunStatus, ScrapeRun, Termination};
pub use scraper::Scraper;
pub use scrapers::types::ListingFilter;
