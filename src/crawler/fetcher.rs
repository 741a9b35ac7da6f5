use std::time::Duration;

use reqwest::Client;

use crate::config::Config;
use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (compatible; feedmill/1.0)";

/// HTTP page fetcher with a hard total time budget per request.
///
/// One GET, no retries: retry policy belongs to whoever schedules crawls,
/// not to the transport.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(USER_AGENT_STRING)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Fetch the raw document body for a source URL.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Fetch(format!("HTTP {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::Fetch(e.to_string()))?;

        Ok(body)
    }
}

impl Default for PageFetcher {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
