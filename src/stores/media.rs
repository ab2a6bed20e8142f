use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::bucket::MediaSource;

/// Downloads media over plain HTTP
#[derive(Clone, Default)]
pub struct HttpMediaSource {
    http: reqwest::Client,
}

impl HttpMediaSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Downloading {}", url);
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()?
            .bytes()
            .await
            .context("Failed to read response body")?;
        Ok(bytes.to_vec())
    }
}
