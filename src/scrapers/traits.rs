use async_trait::async_trait;
use url::Url;

use crate::error::FetchError;

/// One way of loading a listing page.
///
/// Each worker owns exactly one transport for its whole lifetime, so
/// implementations may keep per-session state (a browser tab, cookies).
#[async_trait]
pub trait Transport: Send {
    /// Perform a single attempt to load `url` and return its HTML
    async fn load(&mut self, url: &Url) -> Result<String, FetchError>;

    /// Called after an in-flight `load` was cancelled, so the session can
    /// release whatever the abandoned request was holding
    async fn abort(&mut self) {}

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Creates one [`Transport`] per worker
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, worker: usize) -> anyhow::Result<Box<dyn Transport>>;
}
