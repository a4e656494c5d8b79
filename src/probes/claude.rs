//! Claude (Anthropic) probe.
//!
//! Strategies, in order:
//! - OAuth API using the Claude Code credential (keyring entry or
//!   `~/.claude/.credentials.json`), source label `api`.
//! - CLI PTY: drive `claude`, type `/usage`, scrape the rendered panel.
//!
//! The `/usage` panel renders blocks like:
//!
//! ```text
//! Current session
//! ▮▮▮▮▮▮▮▮▮▮ 42% left
//! Resets at 7pm
//!
//! Current week (all models)
//! ▮▮▮▮▮▮▮▮▮▮ 15% used
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ProbeContext, PtyProbeSpec, UsageProbe, fetch_via_pty, parse_error_from_transcript};
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{ProviderIdentity, RateWindow, UsageSnapshot};
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// CLI binary name.
const CLI_NAME: &str = "claude";

/// Slash-command that renders the usage panel.
const USAGE_COMMAND: &str = "/usage";

/// OAuth usage endpoint base.
const API_BASE: &str = "https://api.anthropic.com";

/// Create the fetch plan for Claude.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::Claude,
        vec![
            FetchStrategy {
                id: "claude-oauth",
                kind: FetchKind::Api,
                probe: Arc::new(ClaudeOAuthProbe::new()),
                is_available: |_| oauth_access_token().is_some(),
                should_fallback: |_| true,
            },
            FetchStrategy {
                id: "claude-cli-pty",
                kind: FetchKind::CliPty,
                probe: Arc::new(ClaudePtyProbe),
                is_available: |ctx| ctx.locator.resolve(CLI_NAME).is_some(),
                should_fallback: |_| false,
            },
        ],
    )
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaudeCredentialsFile {
    #[serde(default)]
    claude_ai_oauth: Option<ClaudeOAuthEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaudeOAuthEntry {
    #[serde(default)]
    access_token: Option<String>,
}

fn claude_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".claude"))
}

/// Resolve the Claude Code OAuth access token: keyring first, then the
/// local credentials file.
fn oauth_access_token() -> Option<String> {
    if let Ok(entry) = keyring::Entry::new("meterbar", "claude-oauth-token") {
        if let Ok(token) = entry.get_password() {
            if !token.trim().is_empty() {
                return Some(token);
            }
        }
    }

    let path = claude_dir()?.join(".credentials.json");
    let content = fs::read_to_string(path).ok()?;
    let creds: ClaudeCredentialsFile = serde_json::from_str(&content).ok()?;
    creds.claude_ai_oauth?.access_token.filter(|t| !t.is_empty())
}

// =============================================================================
// OAuth Probe
// =============================================================================

#[derive(Debug, Deserialize)]
struct OAuthUsageResponse {
    #[serde(default)]
    five_hour: Option<OAuthUsageWindow>,
    #[serde(default)]
    seven_day: Option<OAuthUsageWindow>,
    #[serde(default)]
    seven_day_opus: Option<OAuthUsageWindow>,
    #[serde(default)]
    account: Option<OAuthAccount>,
}

#[derive(Debug, Deserialize)]
struct OAuthUsageWindow {
    #[serde(default)]
    utilization: Option<f64>,
    #[serde(default)]
    resets_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthAccount {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    organization_name: Option<String>,
    #[serde(default)]
    rate_limit_tier: Option<String>,
}

/// OAuth API probe.
pub struct ClaudeOAuthProbe {
    api_base: String,
    token_override: Option<String>,
}

impl ClaudeOAuthProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            token_override: None,
        }
    }

    /// Probe against a custom endpoint with a fixed token. Used by tests.
    #[must_use]
    pub fn with_endpoint(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            token_override: Some(token.into()),
        }
    }
}

impl Default for ClaudeOAuthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageProbe for ClaudeOAuthProbe {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        let token = self
            .token_override
            .clone()
            .or_else(oauth_access_token)
            .ok_or(MeterError::LoginRequired {
                provider: "claude".to_string(),
            })?;

        let url = format!("{}/api/oauth/usage", self.api_base);
        let response = ctx
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/json")
            .header("anthropic-beta", "oauth-2025-04-20")
            .send()
            .await
            .map_err(|e| crate::core::http::classify_request_error("claude", &e))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(MeterError::LoginRequired {
                provider: "claude".to_string(),
            });
        }
        if !status.is_success() {
            return Err(MeterError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let data: OAuthUsageResponse =
            response
                .json()
                .await
                .map_err(|e| MeterError::ParseFailed {
                    provider: "claude".to_string(),
                    reason: e.to_string(),
                })?;

        parse_oauth_response(&data)
    }
}

fn oauth_window(window: &OAuthUsageWindow) -> Option<RateWindow> {
    let utilization = window.utilization?;
    let mut rate = RateWindow::from_used(utilization);
    if let Some(resets_at) = &window.resets_at {
        if let Ok(ts) = resets_at.parse::<DateTime<Utc>>() {
            rate = rate.with_resets_at(ts);
        }
    }
    Some(rate)
}

fn parse_oauth_response(response: &OAuthUsageResponse) -> Result<UsageSnapshot> {
    // The session window is mandatory; a response without it is a broken
    // payload, not an empty account.
    let primary = response
        .five_hour
        .as_ref()
        .and_then(oauth_window)
        .ok_or_else(|| MeterError::ParseFailed {
            provider: "claude".to_string(),
            reason: "missing five_hour utilization".to_string(),
        })?;

    let mut snapshot = UsageSnapshot::new(primary.with_window_minutes(5 * 60));
    snapshot.secondary = response
        .seven_day
        .as_ref()
        .and_then(oauth_window)
        .map(|w| w.with_window_minutes(7 * 24 * 60));
    snapshot.tertiary = response.seven_day_opus.as_ref().and_then(oauth_window);
    snapshot.identity = Some(ProviderIdentity {
        account_email: response
            .account
            .as_ref()
            .and_then(|a| a.email_address.clone()),
        account_organization: response
            .account
            .as_ref()
            .and_then(|a| a.organization_name.clone()),
        login_method: response
            .account
            .as_ref()
            .and_then(|a| a.rate_limit_tier.clone())
            .or_else(|| Some("oauth".to_string())),
    });

    Ok(snapshot)
}

// =============================================================================
// PTY Probe
// =============================================================================

/// CLI PTY probe: `claude` + `/usage`.
pub struct ClaudePtyProbe;

#[async_trait]
impl UsageProbe for ClaudePtyProbe {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        fetch_via_pty(
            ctx,
            &PtyProbeSpec {
                provider: Provider::Claude,
                tool: CLI_NAME,
                command: USAGE_COMMAND,
                parse: parse_usage_transcript,
            },
        )
        .await
    }
}

/// Parse the stripped `/usage` panel text.
///
/// The session percent is mandatory: a transcript without it raises
/// `ParseFailed` even though the PTY call itself succeeded.
pub fn parse_usage_transcript(text: &str) -> Result<UsageSnapshot> {
    use crate::core::normalize::{extract_first, extract_percent};

    let Some(session) = extract_percent("Current session", text) else {
        return Err(parse_error_from_transcript(Provider::Claude, text));
    };

    #[allow(clippy::cast_precision_loss)]
    let to_window = |remaining: i64| RateWindow::from_remaining(remaining as f64);

    let mut snapshot = UsageSnapshot::new(to_window(session));
    snapshot.secondary = extract_percent("Current week (all models)", text).map(to_window);
    snapshot.tertiary = extract_percent("Current week (Opus)", text).map(to_window);

    if let Some(primary) = snapshot.primary.as_mut() {
        if let Some(reset) = extract_first(r"(?im)Resets\s+(.+?)\s*$", text) {
            primary.reset_description = Some(reset);
        }
    }

    let email = extract_first(r"([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})", text);
    let plan = extract_first(r"(?i)Plan:\s*(\w[\w ]*)", text);
    if email.is_some() || plan.is_some() {
        snapshot.identity = Some(ProviderIdentity {
            account_email: email,
            account_organization: None,
            login_method: plan,
        });
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TRANSCRIPT: &str = "\
Settings: user@example.com  Plan: Max

Current session
██████░░░░ 42% left
Resets 7pm (America/New_York)

Current week (all models)
██░░░░░░░░ 15% used

Current week (Opus)
█░░░░░░░░░ 8% used
";

    #[test]
    fn parses_all_three_windows() {
        let snapshot = parse_usage_transcript(FULL_TRANSCRIPT).expect("snapshot");

        let primary = snapshot.primary.expect("primary");
        assert!((primary.remaining_percent - 42.0).abs() < f64::EPSILON);

        // "15% used" converts to 85 remaining.
        let secondary = snapshot.secondary.expect("secondary");
        assert!((secondary.remaining_percent - 85.0).abs() < f64::EPSILON);

        let tertiary = snapshot.tertiary.expect("tertiary");
        assert!((tertiary.remaining_percent - 92.0).abs() < f64::EPSILON);
    }

    #[test]
    fn captures_identity_from_transcript() {
        let snapshot = parse_usage_transcript(FULL_TRANSCRIPT).expect("snapshot");
        let identity = snapshot.identity.expect("identity");
        assert_eq!(identity.account_email.as_deref(), Some("user@example.com"));
        assert_eq!(identity.login_method.as_deref(), Some("Max"));
    }

    #[test]
    fn missing_session_percent_is_parse_failed() {
        let err = parse_usage_transcript("Welcome to Claude Code\n>").unwrap_err();
        assert!(matches!(err, MeterError::ParseFailed { .. }));
    }

    #[test]
    fn error_text_shapes_the_parse_failure() {
        let err = parse_usage_transcript("Error: OAuth token has expired").unwrap_err();
        match err {
            MeterError::ParseFailed { reason, .. } => {
                assert!(reason.to_lowercase().contains("login"));
            }
            other => panic!("expected ParseFailed, got {other:?}"),
        }
    }

    #[test]
    fn session_only_transcript_has_no_secondary() {
        let snapshot = parse_usage_transcript("Current session\n90% left\n").expect("snapshot");
        assert!(snapshot.primary.is_some());
        assert!(snapshot.secondary.is_none());
        assert!(snapshot.tertiary.is_none());
    }

    #[test]
    fn oauth_response_maps_windows() {
        let response = OAuthUsageResponse {
            five_hour: Some(OAuthUsageWindow {
                utilization: Some(30.0),
                resets_at: Some("2026-08-07T12:00:00Z".to_string()),
            }),
            seven_day: Some(OAuthUsageWindow {
                utilization: Some(55.0),
                resets_at: None,
            }),
            seven_day_opus: None,
            account: Some(OAuthAccount {
                email_address: Some("user@example.com".to_string()),
                organization_name: None,
                rate_limit_tier: Some("max_20x".to_string()),
            }),
        };

        let snapshot = parse_oauth_response(&response).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        assert!((primary.used_percent - 30.0).abs() < f64::EPSILON);
        assert!(primary.resets_at.is_some());
        assert_eq!(primary.window_minutes, Some(300));

        let secondary = snapshot.secondary.expect("secondary");
        assert!((secondary.remaining_percent - 45.0).abs() < f64::EPSILON);

        let identity = snapshot.identity.expect("identity");
        assert_eq!(identity.account_email.as_deref(), Some("user@example.com"));
        assert_eq!(identity.login_method.as_deref(), Some("max_20x"));
    }

    #[test]
    fn oauth_response_without_session_window_fails() {
        let response = OAuthUsageResponse {
            five_hour: None,
            seven_day: Some(OAuthUsageWindow {
                utilization: Some(10.0),
                resets_at: None,
            }),
            seven_day_opus: None,
            account: None,
        };
        assert!(matches!(
            parse_oauth_response(&response),
            Err(MeterError::ParseFailed { .. })
        ));
    }

    #[test]
    fn oauth_utilization_clamps_through_rate_window() {
        let response = OAuthUsageResponse {
            five_hour: Some(OAuthUsageWindow {
                utilization: Some(140.0),
                resets_at: None,
            }),
            seven_day: None,
            seven_day_opus: None,
            account: None,
        };
        let snapshot = parse_oauth_response(&response).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        assert!((primary.used_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn plan_orders_oauth_before_pty() {
        let plan = fetch_plan();
        assert_eq!(plan.strategies[0].id, "claude-oauth");
        assert_eq!(plan.strategies[0].kind, FetchKind::Api);
        assert_eq!(plan.strategies[1].id, "claude-cli-pty");
        assert_eq!(plan.strategies[1].kind, FetchKind::CliPty);
        // PTY is the last resort; its failure ends the plan.
        assert!(!(plan.strategies[1].should_fallback)(
            &MeterError::TimedOut {
                provider: "claude".into(),
                seconds: 20,
            }
        ));
    }
}
