//! Cursor probe.
//!
//! Pure web probe: authenticates against cursor.com with an imported
//! browser cookie session, reads the signed-in account, then the monthly
//! request quota. After a successful fetch the session's email is checked
//! against the expected account; a mismatch is a hard failure, not a
//! warning.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProbeContext, UsageProbe};
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{ProviderIdentity, RateWindow, UsageSnapshot, normalize_email};
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// Dashboard domain for cookie import.
const DOMAIN: &str = "cursor.com";

/// API base.
const API_BASE: &str = "https://cursor.com";

/// Create the fetch plan for Cursor.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::Cursor,
        vec![FetchStrategy {
            id: "cursor-web",
            kind: FetchKind::Web,
            probe: Arc::new(CursorWebProbe::new()),
            is_available: |_| true,
            should_fallback: |_| false,
        }],
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorMe {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorUsage {
    #[serde(default, rename = "gpt-4")]
    premium: Option<CursorModelUsage>,
    #[serde(default)]
    start_of_month: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorModelUsage {
    #[serde(default)]
    num_requests: Option<i64>,
    #[serde(default)]
    max_request_usage: Option<i64>,
}

/// Cookie-authenticated web probe.
pub struct CursorWebProbe {
    api_base: String,
}

impl CursorWebProbe {
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

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &ProbeContext,
        path: &str,
        cookie_header: &str,
    ) -> Result<T> {
        let url = format!("{}{path}", self.api_base);
        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header(reqwest::header::COOKIE, cookie_header)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("cursor", &e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MeterError::LoginRequired {
                provider: "cursor".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MeterError::ParseFailed {
                provider: "cursor".to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for CursorWebProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for CursorWebProbe {
    fn provider(&self) -> Provider {
        Provider::Cursor
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let expected = ctx.expected_email(Provider::Cursor);
        let import = ctx
            .cookies
            .cookie_header(DOMAIN, expected.as_deref(), false)?;

        let me: CursorMe = self.get_json(ctx, "/api/auth/me", &import.header).await?;
        if let (Some(expected), Some(actual)) = (expected.as_deref(), me.email.as_deref()) {
            if normalize_email(actual) != normalize_email(expected) {
                return Err(MeterError::AccountMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let usage: CursorUsage = self.get_json(ctx, "/api/usage", &import.header).await?;
        parse_usage(&usage, me.email)
    }
}

fn parse_usage(usage: &CursorUsage, email: Option<String>) -> Result<UsageSnapshot> {
    let premium = usage.premium.as_ref().ok_or_else(|| MeterError::ParseFailed {
        provider: "cursor".to_string(),
        reason: "missing premium request usage".to_string(),
    })?;

    let (Some(used), Some(max)) = (premium.num_requests, premium.max_request_usage) else {
        return Err(MeterError::ParseFailed {
            provider: "cursor".to_string(),
            reason: "missing request counts".to_string(),
        });
    };
    if max <= 0 {
        return Err(MeterError::ParseFailed {
            provider: "cursor".to_string(),
            reason: "non-positive request quota".to_string(),
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let used_percent = (used as f64 / max as f64) * 100.0;
    let mut primary = RateWindow::from_used(used_percent).with_window_minutes(31 * 24 * 60);
    if let Some(start) = usage.start_of_month {
        primary = primary.with_reset_description(format!(
            "monthly window since {}",
            start.format("%Y-%m-%d")
        ));
    }

    let mut snapshot = UsageSnapshot::new(primary);
    snapshot.identity = Some(ProviderIdentity {
        account_email: email,
        account_organization: None,
        login_method: Some("web".to_string()),
    });
    Ok(snapshot)
}
