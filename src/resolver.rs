use crate::catalog::{QueryDef, QuerySource};
use crate::error::{ExportError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Port for the external versioned SQL source.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_text(&self, path: &str) -> Result<String>;
}

/// Fetches query text over HTTP from a raw-content host (e.g. a git forge).
pub struct HttpRemoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_text(&self, path: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }
}

/// Turns a catalog entry into literal query text. Remote paths are re-fetched
/// on every run so the latest committed version is exported.
pub struct QueryResolver {
    source: std::sync::Arc<dyn RemoteSource>,
}

impl QueryResolver {
    pub fn new(source: std::sync::Arc<dyn RemoteSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(&self, query: &QueryDef) -> Result<String> {
        match &query.source {
            QuerySource::Inline(text) => Ok(text.clone()),
            QuerySource::Remote(path) => {
                debug!("Fetching query text for {} from {}", query.name, path);
                self.source
                    .fetch_text(path)
                    .await
                    .map_err(|e| ExportError::Resolution {
                        query: query.name.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }
}
