//! z.ai token-billing probe.
//!
//! API-key authenticated quota endpoint. The response carries a list of
//! typed limits; `TOKENS_LIMIT` is the primary quota, other entries land in
//! the rate-limit detail map.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProbeContext, UsageProbe};
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{RateWindow, UsageSnapshot};
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// API base.
const API_BASE: &str = "https://api.z.ai";

/// Create the fetch plan for z.ai.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::Zai,
        vec![FetchStrategy {
            id: "zai-api",
            kind: FetchKind::Api,
            probe: Arc::new(ZaiApiProbe::new()),
            is_available: |ctx| ctx.api_key(Provider::Zai).is_some(),
            should_fallback: |_| false,
        }],
    )
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    #[serde(default)]
    data: Option<QuotaData>,
}

#[derive(Debug, Deserialize)]
struct QuotaData {
    #[serde(default)]
    limits: Vec<QuotaLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaLimit {
    #[serde(rename = "type")]
    #[serde(default)]
    limit_type: Option<String>,
    /// Used percentage of the window.
    #[serde(default)]
    percentage: Option<f64>,
    /// Reset time in epoch milliseconds.
    #[serde(default)]
    reset_time: Option<i64>,
}

/// API-key probe.
pub struct ZaiApiProbe {
    api_base: String,
}

impl ZaiApiProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
        }
    }

    /// Probe against a custom endpoint. Used by tests.
    #[must_use]
    pub fn with_endpoint(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

impl Default for ZaiApiProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for ZaiApiProbe {
    fn provider(&self) -> Provider {
        Provider::Zai
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let api_key = ctx
            .api_key(Provider::Zai)
            .ok_or(MeterError::LoginRequired {
                provider: "zai".to_string(),
            })?;

        let url = format!("{}/api/monitor/usage/quota/limit", self.api_base);
        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("zai", &e))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(MeterError::LoginRequired {
                provider: "zai".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let data: QuotaResponse = response
            .json()
            .await
            .map_err(|e| MeterError::ParseFailed {
                provider: "zai".to_string(),
                reason: e.to_string(),
            })?;

        parse_quota_response(&data)
    }
}

fn limit_window(limit: &QuotaLimit) -> Option<RateWindow> {
    let used = limit.percentage?;
    let mut window = RateWindow::from_used(used);
    if let Some(ms) = limit.reset_time {
        if let Some(at) = DateTime::<Utc>::from_timestamp_millis(ms) {
            window = window.with_resets_at(at);
        }
    }
    Some(window)
}

fn parse_quota_response(response: &QuotaResponse) -> Result<UsageSnapshot> {
    let limits = response
        .data
        .as_ref()
        .map(|d| d.limits.as_slice())
        .unwrap_or_default();

    let mut snapshot = UsageSnapshot::empty();
    for limit in limits {
        let Some(window) = limit_window(limit) else {
            continue;
        };
        match limit.limit_type.as_deref() {
            Some("TOKENS_LIMIT") => snapshot.primary = Some(window),
            Some(other) => {
                snapshot
                    .rate_limit_detail
                    .insert(other.to_lowercase(), window);
            }
            None => {}
        }
    }

    if snapshot.primary.is_none() {
        return Err(MeterError::ParseFailed {
            provider: "zai".to_string(),
            reason: "missing TOKENS_LIMIT entry".to_string(),
        });
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(limit_type: &str, percentage: f64) -> QuotaLimit {
        QuotaLimit {
            limit_type: Some(limit_type.to_string()),
            percentage: Some(percentage),
            reset_time: Some(1_770_000_000_000),
        }
    }

    #[test]
    fn tokens_limit_becomes_primary() {
        let response = QuotaResponse {
            data: Some(QuotaData {
                limits: vec![limit("TOKENS_LIMIT", 35.0), limit("MCP_LIMIT", 10.0)],
            }),
        };

        let snapshot = parse_quota_response(&response).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        assert!((primary.used_percent - 35.0).abs() < f64::EPSILON);
        assert!(primary.resets_at.is_some());

        let detail = snapshot.rate_limit_detail.get("mcp_limit").expect("detail");
        assert!((detail.used_percent - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_tokens_limit_fails_parse() {
        let response = QuotaResponse {
            data: Some(QuotaData {
                limits: vec![limit("MCP_LIMIT", 10.0)],
            }),
        };
        assert!(matches!(
            parse_quota_response(&response),
            Err(MeterError::ParseFailed { .. })
        ));
    }

    #[test]
    fn empty_response_fails_parse() {
        let response = QuotaResponse { data: None };
        assert!(parse_quota_response(&response).is_err());
    }
}
