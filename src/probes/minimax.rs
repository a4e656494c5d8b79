//! MiniMax token-billing probe.
//!
//! API-key authenticated balance endpoint: a monthly token allowance plus a
//! prepaid credit balance.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProbeContext, UsageProbe};
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{CreditsSnapshot, RateWindow, UsageSnapshot};
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// API base.
const API_BASE: &str = "https://api.minimax.io";

/// Create the fetch plan for MiniMax.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::MiniMax,
        vec![FetchStrategy {
            id: "minimax-api",
            kind: FetchKind::Api,
            probe: Arc::new(MiniMaxApiProbe::new()),
            is_available: |ctx| ctx.api_key(Provider::MiniMax).is_some(),
            should_fallback: |_| false,
        }],
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct QuotaResponse {
    #[serde(default)]
    total_tokens: Option<i64>,
    #[serde(default)]
    used_tokens: Option<i64>,
    #[serde(default)]
    balance: Option<f64>,
}

/// API-key probe.
pub struct MiniMaxApiProbe {
    api_base: String,
}

impl MiniMaxApiProbe {
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

impl Default for MiniMaxApiProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for MiniMaxApiProbe {
    fn provider(&self) -> Provider {
        Provider::MiniMax
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let api_key = ctx
            .api_key(Provider::MiniMax)
            .ok_or(MeterError::LoginRequired {
                provider: "minimax".to_string(),
            })?;

        let url = format!("{}/v1/user/usage_quota", self.api_base);
        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("minimax", &e))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(MeterError::LoginRequired {
                provider: "minimax".to_string(),
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
                provider: "minimax".to_string(),
                reason: e.to_string(),
            })?;

        parse_quota_response(&data)
    }
}

fn parse_quota_response(response: &QuotaResponse) -> Result<UsageSnapshot> {
    let (Some(total), Some(used)) = (response.total_tokens, response.used_tokens) else {
        return Err(MeterError::ParseFailed {
            provider: "minimax".to_string(),
            reason: "missing token totals".to_string(),
        });
    };
    if total <= 0 {
        return Err(MeterError::ParseFailed {
            provider: "minimax".to_string(),
            reason: "non-positive token allowance".to_string(),
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let used_percent = (used as f64 / total as f64) * 100.0;
    let mut snapshot = UsageSnapshot::new(RateWindow::from_used(used_percent));
    snapshot.credits = response.balance.map(CreditsSnapshot::new);
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_totals_map_to_percent_and_credits() {
        let response = QuotaResponse {
            total_tokens: Some(1_000_000),
            used_tokens: Some(250_000),
            balance: Some(42.0),
        };

        let snapshot = parse_quota_response(&response).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        assert!((primary.used_percent - 25.0).abs() < f64::EPSILON);
        assert!((snapshot.credits.expect("credits").remaining - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overconsumption_clamps_to_depleted() {
        let response = QuotaResponse {
            total_tokens: Some(100),
            used_tokens: Some(150),
            balance: None,
        };
        let snapshot = parse_quota_response(&response).expect("snapshot");
        assert!(snapshot.primary.expect("primary").is_depleted());
    }

    #[test]
    fn missing_totals_fail_parse() {
        let response = QuotaResponse {
            total_tokens: None,
            used_tokens: Some(10),
            balance: Some(1.0),
        };
        assert!(matches!(
            parse_quota_response(&response),
            Err(MeterError::ParseFailed { .. })
        ));
    }
}
