use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, PageError};
use crate::scrapers::traits::Transport;

/// Retry schedule for one page
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    /// Attempt `n` (1-based retry number) waits `n * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// Loads listing pages through a worker-owned transport, retrying
/// transient failures with linearly increasing backoff.
pub struct PageFetcher {
    transport: Box<dyn Transport>,
    policy: RetryPolicy,
}

impl PageFetcher {
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Fetch one page, giving up early when `cancel` fires
    pub async fn fetch(
        &mut self,
        page: u32,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<String, PageError> {
        let attempts = self.policy.retries + 1;
        let mut last_error = FetchError::EmptyBody;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_before(attempt);
                warn!(
                    "Retry {}/{} for page {} in {:?}: {}",
                    attempt, self.policy.retries, page, delay, last_error
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(PageError::Cancelled { page }),
                }
            }

            match self.attempt(url, cancel).await {
                Ok(html) => {
                    debug!("Loaded page {} on attempt {}", page, attempt + 1);
                    return Ok(html);
                }
                Err(FetchError::Cancelled) => return Err(PageError::Cancelled { page }),
                Err(e) if !e.is_transient() => {
                    return Err(PageError::Fetch {
                        page,
                        attempts: attempt + 1,
                        source: e,
                    })
                }
                Err(e) => last_error = e,
            }
        }

        Err(PageError::Fetch {
            page,
            attempts,
            source: last_error,
        })
    }

    async fn attempt(
        &mut self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.transport.load(url) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                // The load future is dropped by now; let the session clean up.
                self.transport.abort().await;
                Err(FetchError::Cancelled)
            }
        }
    }
}
