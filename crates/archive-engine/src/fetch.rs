//! Page fetch capability

use std::time::Duration;

use archive_proto::config::FetchConfig;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Fetches one page as text.  Timeouts, transport errors and non-success
/// statuses all surface as [`EngineError::Fetch`].
#[async_trait]
pub trait HtmlFetch: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// reqwest-backed fetcher used by the daemon.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::fetch("<client>", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HtmlFetch for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("fetch: GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html")
            .send()
            .await
            .map_err(|e| EngineError::fetch(url, e))?;

        if !response.status().is_success() {
            return Err(EngineError::fetch(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| EngineError::fetch(url, e))?;
        debug!("fetch: {} returned {} bytes", url, html.len());
        Ok(html)
    }
}
