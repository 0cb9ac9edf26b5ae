use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::ScraperConfig;
use crate::models::ListingRecord;
use crate::scrapers::types::ListingFilter;

/// Body POSTed to the webhook sink
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub filters_used: serde_json::Map<String, serde_json::Value>,
    pub properties: Vec<ListingRecord>,
    pub total_found: usize,
}

impl WebhookPayload {
    pub fn new(filter: &ListingFilter, records: Vec<ListingRecord>) -> Self {
        Self {
            filters_used: filter.applied_fields(),
            total_found: records.len(),
            properties: records,
        }
    }
}

/// Plain client for the webhook sink, without the scraping headers
pub fn build_webhook_client(config: &ScraperConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to create webhook HTTP client")
}

/// Forwards finished result sets to an external endpoint, at most once
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    pending: TaskTracker,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            pending: TaskTracker::new(),
        }
    }

    /// Single POST; non-2xx responses are errors
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to send webhook to {}", self.url))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Webhook responded with {}: {}", status, body);
        }
        Ok(body)
    }

    /// Deliver in the background. Errors are logged and never reach the caller.
    pub fn notify(&self, filter: &ListingFilter, records: Vec<ListingRecord>) -> JoinHandle<()> {
        let notifier = self.clone();
        let payload = WebhookPayload::new(filter, records);

        self.pending.spawn(async move {
            info!("Sending {} properties to webhook", payload.total_found);
            match notifier.deliver(&payload).await {
                Ok(body) => info!("Webhook accepted result set: {}", body),
                Err(e) => error!("Webhook delivery failed: {:#}", e),
            }
        })
    }

    /// Wait for deliveries already started; later `notify` calls still spawn
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }
}
