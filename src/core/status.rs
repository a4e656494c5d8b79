//! Provider status-page health checks.
//!
//! Fetches statuspage.io-compatible `status.json` endpoints for providers
//! that publish one. Runs as part of the refresh fan-out, one task alongside
//! the usage probes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::models::{StatusIndicator, StatusPayload};
use crate::error::{MeterError, Result};

/// Timeout for status fetches; status pages are best-effort.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StatuspageResponse {
    status: StatuspageStatus,
    page: StatuspagePage,
}

#[derive(Debug, Deserialize)]
struct StatuspageStatus {
    indicator: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct StatuspagePage {
    url: String,
    updated_at: Option<DateTime<Utc>>,
}

/// Fetcher for provider status pages.
pub struct StatusFetcher {
    client: Client,
}

impl StatusFetcher {
    /// Create a fetcher with a status-scoped timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(STATUS_TIMEOUT)
                .build()
                .map_err(|e| MeterError::Network(e.to_string()))?,
        })
    }

    /// Fetch status from a statuspage.io-compatible base URL.
    ///
    /// A non-success HTTP status degrades to `Unknown` rather than erroring:
    /// a broken status page must not surface as a provider failure.
    ///
    /// # Errors
    ///
    /// Returns an error only on transport failure or unparseable JSON.
    pub async fn fetch(&self, base_url: &str) -> Result<StatusPayload> {
        let api_url = format!("{}/api/v2/status.json", base_url.trim_end_matches('/'));

        let response = self.client.get(&api_url).send().await.map_err(|e| {
            if e.is_timeout() {
                MeterError::TimedOut {
                    provider: base_url.to_string(),
                    seconds: STATUS_TIMEOUT.as_secs(),
                }
            } else {
                MeterError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Ok(StatusPayload {
                indicator: StatusIndicator::Unknown,
                description: Some(format!("HTTP {}", response.status())),
                updated_at: None,
                url: base_url.to_string(),
            });
        }

        let data: StatuspageResponse =
            response
                .json()
                .await
                .map_err(|e| MeterError::ParseFailed {
                    provider: base_url.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(StatusPayload {
            indicator: StatusIndicator::from_statuspage(&data.status.indicator),
            description: Some(data.status.description),
            updated_at: data.page.updated_at,
            url: data.page.url,
        })
    }
}
