//! Codex (OpenAI) probe.
//!
//! Strategies, in order:
//! - Token API: the access token and account id from `~/.codex/auth.json`
//!   against the usage endpoint, source label `api`.
//! - CLI RPC: `codex usage --json`, source label `cli`.
//!
//! The same usage endpoint, authenticated with imported browser cookies
//! instead of the CLI token, doubles as the web-dashboard source used for
//! account reconciliation ([`OpenAIDashboardProbe`]).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProbeContext, UsageProbe};
use crate::core::exec::run_json_command;
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{
    CreditsSnapshot, OpenAIDashboardSnapshot, ProviderIdentity, RateWindow, UsageSnapshot,
};
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// CLI binary name.
const CLI_NAME: &str = "codex";

/// Usage endpoint base (token- or cookie-authenticated).
const API_BASE: &str = "https://chatgpt.com";

/// Create the fetch plan for Codex.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::Codex,
        vec![
            FetchStrategy {
                id: "codex-api",
                kind: FetchKind::Api,
                probe: Arc::new(CodexApiProbe::new()),
                is_available: |_| read_local_auth().is_some_and(|a| a.tokens.is_some()),
                should_fallback: |_| true,
            },
            FetchStrategy {
                id: "codex-cli-rpc",
                kind: FetchKind::CliRpc,
                probe: Arc::new(CodexCliProbe),
                is_available: |ctx| ctx.locator.resolve(CLI_NAME).is_some(),
                should_fallback: |_| false,
            },
        ],
    )
}

// =============================================================================
// Local Auth
// =============================================================================

#[derive(Debug, Deserialize)]
struct CodexAuthJson {
    #[serde(default)]
    tokens: Option<CodexAuthTokens>,
}

#[derive(Debug, Deserialize)]
struct CodexAuthTokens {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

/// JWT claims embedded in the id_token.
#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "https://api.openai.com/auth")]
    openai_auth: Option<OpenAiAuthClaims>,
}

#[derive(Debug, Deserialize)]
struct OpenAiAuthClaims {
    #[serde(default)]
    chatgpt_plan_type: Option<String>,
}

fn codex_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".codex"))
}

fn read_local_auth() -> Option<CodexAuthJson> {
    let auth_path = codex_dir()?.join("auth.json");
    let content = fs::read_to_string(auth_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Decode the payload section of a JWT (base64url, middle part).
fn decode_jwt_payload(token: &str) -> Option<JwtClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let mut payload = parts[1].replace('-', "+").replace('_', "/");
    let padding = (4 - payload.len() % 4) % 4;
    payload.push_str(&"=".repeat(padding));

    let decoded = base64_decode(&payload)?;
    serde_json::from_slice(&decoded).ok()
}

/// Standard-alphabet base64 decoder; enough for JWT payloads.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut result = Vec::new();
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for c in input.bytes() {
        if c == b'=' {
            break;
        }
        let value = ALPHABET.iter().position(|&x| x == c)? as u32;
        buffer = (buffer << 6) | value;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            result.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Some(result)
}

/// Identity derived from the local auth.json JWT claims.
fn local_identity() -> Option<ProviderIdentity> {
    let auth = read_local_auth()?;
    let tokens = auth.tokens?;
    let claims = decode_jwt_payload(tokens.id_token.as_deref()?)?;

    Some(ProviderIdentity {
        account_email: claims.email,
        account_organization: None,
        login_method: claims.openai_auth.and_then(|a| a.chatgpt_plan_type),
    })
}

// =============================================================================
// Usage Endpoint Payload
// =============================================================================

#[derive(Debug, Deserialize)]
struct WhamUsageResponse {
    #[serde(default)]
    rate_limit: Option<WhamRateLimit>,
    #[serde(default)]
    plan_type: Option<String>,
    #[serde(default)]
    credits: Option<WhamCredits>,
    #[serde(default)]
    user: Option<WhamUser>,
}

#[derive(Debug, Deserialize)]
struct WhamRateLimit {
    #[serde(default)]
    primary_window: Option<WhamWindow>,
    #[serde(default)]
    secondary_window: Option<WhamWindow>,
}

#[derive(Debug, Deserialize)]
struct WhamWindow {
    #[serde(default)]
    used_percent: Option<f64>,
    /// Unix timestamp.
    #[serde(default)]
    reset_at: Option<f64>,
    #[serde(default)]
    limit_window_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WhamCredits {
    #[serde(default)]
    balance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhamUser {
    #[serde(default)]
    email: Option<String>,
}

fn wham_window(window: &WhamWindow) -> Option<RateWindow> {
    let used = window.used_percent?;
    let mut rate = RateWindow::from_used(used);
    if let Some(ts) = window.reset_at {
        #[allow(clippy::cast_possible_truncation)]
        if let Some(at) = DateTime::<Utc>::from_timestamp(ts as i64, 0) {
            rate = rate.with_resets_at(at);
        }
    }
    if let Some(secs) = window.limit_window_seconds {
        #[allow(clippy::cast_possible_truncation)]
        let minutes = (secs / 60) as i32;
        rate = rate.with_window_minutes(minutes);
    }
    Some(rate)
}

fn parse_wham_response(response: &WhamUsageResponse) -> Result<UsageSnapshot> {
    let rate_limit = response.rate_limit.as_ref();
    let primary = rate_limit
        .and_then(|rl| rl.primary_window.as_ref())
        .and_then(wham_window)
        .ok_or_else(|| MeterError::ParseFailed {
            provider: "codex".to_string(),
            reason: "missing primary rate-limit window".to_string(),
        })?;

    let mut snapshot = UsageSnapshot::new(primary);
    snapshot.secondary = rate_limit
        .and_then(|rl| rl.secondary_window.as_ref())
        .and_then(wham_window);
    snapshot.credits = response
        .credits
        .as_ref()
        .and_then(|c| c.balance)
        .map(CreditsSnapshot::new);

    let email = response.user.as_ref().and_then(|u| u.email.clone());
    let identity = local_identity().or_else(|| {
        Some(ProviderIdentity {
            account_email: email.clone(),
            account_organization: None,
            login_method: response.plan_type.clone(),
        })
    });
    snapshot.identity = identity.map(|mut id| {
        if id.account_email.is_none() {
            id.account_email = email.clone();
        }
        if id.login_method.is_none() {
            id.login_method = response.plan_type.clone();
        }
        id
    });

    Ok(snapshot)
}

// =============================================================================
// Token API Probe
// =============================================================================

/// Usage probe authenticated with the CLI's own access token.
pub struct CodexApiProbe {
    api_base: String,
    creds_override: Option<(String, String)>,
}

impl CodexApiProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            creds_override: None,
        }
    }

    /// Probe against a custom endpoint with fixed credentials. Used by tests.
    #[must_use]
    pub fn with_endpoint(
        api_base: impl Into<String>,
        access_token: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            creds_override: Some((access_token.into(), account_id.into())),
        }
    }

    fn credentials(&self) -> Result<(String, String)> {
        if let Some(creds) = &self.creds_override {
            return Ok(creds.clone());
        }
        let tokens = read_local_auth()
            .and_then(|a| a.tokens)
            .ok_or(MeterError::LoginRequired {
                provider: "codex".to_string(),
            })?;
        match (tokens.access_token, tokens.account_id) {
            (Some(token), Some(account)) => Ok((token, account)),
            _ => Err(MeterError::LoginRequired {
                provider: "codex".to_string(),
            }),
        }
    }
}

impl Default for CodexApiProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for CodexApiProbe {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let (access_token, account_id) = self.credentials()?;
        let url = format!("{}/backend-api/wham/usage", self.api_base);

        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("ChatGPT-Account-Id", account_id)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("codex", &e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MeterError::LoginRequired {
                provider: "codex".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let data: WhamUsageResponse =
            response
                .json()
                .await
                .map_err(|e| MeterError::ParseFailed {
                    provider: "codex".to_string(),
                    reason: e.to_string(),
                })?;

        parse_wham_response(&data)
    }
}

// =============================================================================
// CLI RPC Probe
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexCliUsage {
    #[serde(default)]
    rate_limit: Option<CodexCliRateLimit>,
    #[serde(default)]
    credits: Option<CodexCliCredits>,
    #[serde(default)]
    user: Option<CodexCliUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexCliRateLimit {
    #[serde(default)]
    remaining_percent: Option<f64>,
    #[serde(default)]
    resets_at: Option<String>,
    #[serde(default)]
    weekly_remaining_percent: Option<f64>,
    #[serde(default)]
    weekly_resets_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexCliCredits {
    #[serde(default)]
    remaining: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodexCliUser {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    plan: Option<String>,
}

/// CLI RPC probe: `codex usage --json`.
pub struct CodexCliProbe;

#[async_trait]
impl UsageProbe for CodexCliProbe {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let Some(binary) = ctx.locator.resolve(CLI_NAME) else {
            return Err(MeterError::ToolNotInstalled {
                tool: CLI_NAME.to_string(),
            });
        };

        let usage: CodexCliUsage = run_json_command(
            &binary,
            &["usage", "--json"],
            Provider::Codex.default_timeout(),
        )
        .await?;

        parse_cli_usage(&usage)
    }
}

fn parse_cli_usage(usage: &CodexCliUsage) -> Result<UsageSnapshot> {
    let rate_limit = usage.rate_limit.as_ref();
    let primary = rate_limit
        .and_then(|rl| rl.remaining_percent)
        .map(RateWindow::from_remaining)
        .ok_or_else(|| MeterError::ParseFailed {
            provider: "codex".to_string(),
            reason: "missing remainingPercent".to_string(),
        })?;

    let primary = match rate_limit.and_then(|rl| rl.resets_at.as_ref()) {
        Some(resets_at) => match resets_at.parse::<DateTime<Utc>>() {
            Ok(ts) => primary.with_resets_at(ts),
            Err(_) => primary,
        },
        None => primary,
    };

    let mut snapshot = UsageSnapshot::new(primary);
    snapshot.secondary = rate_limit.and_then(|rl| {
        let window = RateWindow::from_remaining(rl.weekly_remaining_percent?);
        Some(match rl.weekly_resets_at.as_ref().and_then(|s| s.parse().ok()) {
            Some(ts) => window.with_resets_at(ts),
            None => window,
        })
    });
    snapshot.credits = usage
        .credits
        .as_ref()
        .and_then(|c| c.remaining)
        .map(CreditsSnapshot::new);
    snapshot.identity = usage.user.as_ref().map(|u| ProviderIdentity {
        account_email: u.email.clone(),
        account_organization: None,
        login_method: u.plan.clone(),
    });

    Ok(snapshot)
}

// =============================================================================
// Dashboard Probe
// =============================================================================

/// Consumed by the orchestrator's reconciliation pass: fetch the OpenAI web
/// dashboard with an imported cookie session.
#[async_trait]
pub trait DashboardProbe: Send + Sync {
    /// Fetch the dashboard with the given `Cookie:` header value.
    ///
    /// # Errors
    ///
    /// `LoginRequired` when the session is rejected, `NoDashboardData` when
    /// the response carries nothing usable.
    async fn fetch(
        &self,
        ctx: &ProbeContext,
        cookie_header: &str,
    ) -> Result<OpenAIDashboardSnapshot>;
}

/// Cookie-authenticated dashboard scrape against the usage endpoint.
pub struct OpenAIDashboardProbe {
    api_base: String,
}

impl OpenAIDashboardProbe {
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

impl Default for OpenAIDashboardProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DashboardProbe for OpenAIDashboardProbe {
    async fn fetch(
        &self,
        ctx: &ProbeContext,
        cookie_header: &str,
    ) -> Result<OpenAIDashboardSnapshot> {
        let url = format!("{}/backend-api/wham/usage", self.api_base);

        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header(reqwest::header::COOKIE, cookie_header)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("codex", &e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MeterError::LoginRequired {
                provider: "codex".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let data: WhamUsageResponse =
            response
                .json()
                .await
                .map_err(|e| MeterError::ParseFailed {
                    provider: "codex".to_string(),
                    reason: e.to_string(),
                })?;

        parse_dashboard_response(&data)
    }
}

// =============================================================================
// Credits Probe
// =============================================================================

/// Consumed by the orchestrator's auxiliary credits task. Credits refresh on
/// their own cadence and are cached across failures.
#[async_trait]
pub trait CreditsProbe: Send + Sync {
    /// Fetch the current credit balance.
    ///
    /// # Errors
    ///
    /// `LoginRequired` on a rejected session, transport errors otherwise.
    async fn fetch(&self, ctx: &ProbeContext) -> Result<CreditsSnapshot>;
}

#[derive(Debug, Deserialize)]
struct WhamCreditsResponse {
    #[serde(default)]
    balance: Option<f64>,
}

/// Token-authenticated credits fetch.
pub struct CodexCreditsProbe {
    api_base: String,
    creds_override: Option<(String, String)>,
}

impl CodexCreditsProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            creds_override: None,
        }
    }

    /// Probe against a custom endpoint with fixed credentials. Used by tests.
    #[must_use]
    pub fn with_endpoint(
        api_base: impl Into<String>,
        access_token: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            creds_override: Some((access_token.into(), account_id.into())),
        }
    }
}

impl Default for CodexCreditsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CreditsProbe for CodexCreditsProbe {
    async fn fetch(&self, ctx: &ProbeContext) -> Result<CreditsSnapshot> {
        let (access_token, account_id) = match &self.creds_override {
            Some(creds) => creds.clone(),
            None => {
                let tokens = read_local_auth().and_then(|a| a.tokens).ok_or(
                    MeterError::LoginRequired {
                        provider: "codex".to_string(),
                    },
                )?;
                match (tokens.access_token, tokens.account_id) {
                    (Some(token), Some(account)) => (token, account),
                    _ => {
                        return Err(MeterError::LoginRequired {
                            provider: "codex".to_string(),
                        });
                    }
                }
            }
        };

        let url = format!("{}/backend-api/wham/credits", self.api_base);
        let response = ctx
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("ChatGPT-Account-Id", account_id)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("codex", &e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(MeterError::LoginRequired {
                provider: "codex".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let data: WhamCreditsResponse =
            response
                .json()
                .await
                .map_err(|e| MeterError::ParseFailed {
                    provider: "codex".to_string(),
                    reason: e.to_string(),
                })?;

        data.balance
            .map(CreditsSnapshot::new)
            .ok_or_else(|| MeterError::ParseFailed {
                provider: "codex".to_string(),
                reason: "missing credit balance".to_string(),
            })
    }
}

fn parse_dashboard_response(response: &WhamUsageResponse) -> Result<OpenAIDashboardSnapshot> {
    let rate_limit = response.rate_limit.as_ref();
    let snapshot = OpenAIDashboardSnapshot {
        signed_in_email: response.user.as_ref().and_then(|u| u.email.clone()),
        primary_limit: rate_limit
            .and_then(|rl| rl.primary_window.as_ref())
            .and_then(wham_window),
        secondary_limit: rate_limit
            .and_then(|rl| rl.secondary_window.as_ref())
            .and_then(wham_window),
        credits_remaining: response.credits.as_ref().and_then(|c| c.balance),
        account_plan: response.plan_type.clone(),
        updated_at: Utc::now(),
    };

    let empty = snapshot.signed_in_email.is_none()
        && snapshot.primary_limit.is_none()
        && snapshot.secondary_limit.is_none()
        && snapshot.credits_remaining.is_none();
    if empty {
        return Err(MeterError::NoDashboardData {
            provider: "codex".to_string(),
        });
    }

    Ok(snapshot)
}
