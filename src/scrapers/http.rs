use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use crate::scrapers::traits::{Transport, TransportFactory};

/// Build the HTTP client shared by HTTP transports and the webhook notifier
pub fn build_client(config: &ScraperConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("ru-RU,ru;q=0.8,en-US;q=0.5,en;q=0.3"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.as_str())
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

/// Static-page transport: one GET per attempt
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn load(&mut self, url: &Url) -> Result<String, FetchError> {
        debug!("Fetching URL: {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response.text().await?;
        if html.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }

        debug!("Downloaded {} bytes of HTML", html.len());
        Ok(html)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Hands every worker a transport backed by the same connection pool
pub struct HttpTransportFactory {
    client: Client,
    timeout: Duration,
}

impl HttpTransportFactory {
    pub fn new(client: Client, config: &ScraperConfig) -> Self {
        Self {
            client,
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    async fn create(&self, _worker: usize) -> anyhow::Result<Box<dyn Transport>> {
        Ok(Box::new(HttpTransport::new(
            self.client.clone(),
            self.timeout,
        )))
    }
}
