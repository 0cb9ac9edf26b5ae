use std::time::Duration;
use thiserror::Error;

/// Failure of a single page request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::Cancelled)
    }
}

/// Page-fatal condition, recorded against one page only
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page {page}: fetch failed after {attempts} attempts: {source}")]
    Fetch {
        page: u32,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("page {page}: no listing container found")]
    NoListings { page: u32 },
    #[error("page {page}: cancelled")]
    Cancelled { page: u32 },
}

impl PageError {
    pub fn page(&self) -> u32 {
        match self {
            PageError::Fetch { page, .. }
            | PageError::NoListings { page }
            | PageError::Cancelled { page } => *page,
        }
    }
}

/// Failure of the whole invocation, raised before any worker starts
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid search URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
