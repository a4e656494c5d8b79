//! Per-provider status probes.
//!
//! A probe is a pure function from external state (PTY transcript, HTTP
//! response, credential files) to a canonical [`UsageSnapshot`] or a typed
//! error. Probes hold no persisted identity between calls; everything they
//! need arrives through the [`ProbeContext`].
//!
//! Three families:
//! - **CLI-PTY** (claude, gemini): drive the provider's interactive CLI
//!   through a pseudo-terminal and scrape the rendered text.
//! - **Web/API** (cursor, zai, minimax): authenticated HTTP, via imported
//!   browser cookies or an API key.
//! - **Hybrid** (codex: CLI-derived token against a web API; claude: OAuth
//!   with PTY fallback).

pub mod claude;
pub mod codex;
pub mod cursor;
pub mod gemini;
pub mod minimax;
pub mod token_cost;
pub mod zai;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::cookies::CookieHeaderSource;
use crate::core::fetch_plan::FetchPlan;
use crate::core::locate::BinaryLocator;
use crate::core::models::UsageSnapshot;
use crate::core::normalize::{extract_usage_error, strip_ansi_codes};
use crate::core::provider::Provider;
use crate::core::pty::{DEFAULT_COLS, DEFAULT_ROWS, PtyCommandRunner, PtyRequest};
use crate::error::{MeterError, Result};

// =============================================================================
// Probe Trait
// =============================================================================

/// One fetch strategy's implementation.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Which provider this probe serves.
    fn provider(&self) -> Provider;

    /// Fetch a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Typed [`MeterError`] per the probe taxonomy. Probes never decide
    /// visibility; the orchestrator does.
    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot>;
}

// =============================================================================
// Probe Context
// =============================================================================

/// Tunables shared by all probes.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub pty_rows: u16,
    pub pty_cols: u16,
    /// Fixed delay before the second PTY attempt. Deliberately not
    /// exponential: the failure mode is a slow CLI redraw, not load.
    pub retry_delay: Duration,
    /// Extra time granted to the second PTY attempt.
    pub retry_grace: Duration,
    /// API keys for token-billing providers, keyed by provider.
    pub api_keys: HashMap<Provider, String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            pty_rows: DEFAULT_ROWS,
            pty_cols: DEFAULT_COLS,
            retry_delay: Duration::from_millis(250),
            retry_grace: Duration::from_secs(10),
            api_keys: HashMap::new(),
        }
    }
}

/// Capabilities and settings handed to every probe call.
///
/// The PTY runner, binary locator, and cookie source are the consumed
/// collaborator interfaces; tests substitute scripted implementations.
pub struct ProbeContext {
    pub http: reqwest::Client,
    pub pty: Arc<dyn PtyCommandRunner>,
    pub locator: Arc<dyn BinaryLocator>,
    pub cookies: Arc<dyn CookieHeaderSource>,
    pub settings: ProbeSettings,
    expected_emails: RwLock<HashMap<Provider, String>>,
}

impl ProbeContext {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        pty: Arc<dyn PtyCommandRunner>,
        locator: Arc<dyn BinaryLocator>,
        cookies: Arc<dyn CookieHeaderSource>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            http,
            pty,
            locator,
            cookies,
            settings,
            expected_emails: RwLock::new(HashMap::new()),
        }
    }

    /// The account email web probes must match, learned from the primary
    /// CLI/OAuth source. Updated by the orchestrator after each refresh.
    #[must_use]
    pub fn expected_email(&self, provider: Provider) -> Option<String> {
        self.expected_emails
            .read()
            .expect("expected email lock")
            .get(&provider)
            .cloned()
    }

    /// Record or clear the expected account email for a provider.
    pub fn set_expected_email(&self, provider: Provider, email: Option<String>) {
        let mut map = self.expected_emails.write().expect("expected email lock");
        match email {
            Some(email) => {
                map.insert(provider, email);
            }
            None => {
                map.remove(&provider);
            }
        }
    }

    /// API key for a token-billing provider, from settings or environment.
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        if let Some(key) = self.settings.api_keys.get(&provider) {
            return Some(key.clone());
        }
        let var = match provider {
            Provider::Zai => "ZAI_API_KEY",
            Provider::MiniMax => "MINIMAX_API_KEY",
            _ => return None,
        };
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

// =============================================================================
// Shared PTY Probe Algorithm
// =============================================================================

/// Static description of a PTY-driven probe.
pub struct PtyProbeSpec {
    pub provider: Provider,
    /// CLI binary name resolved through the locator.
    pub tool: &'static str,
    /// Slash-command typed into the CLI (submitted with CR).
    pub command: &'static str,
    /// Transcript parser. Must raise `ParseFailed` when a mandatory field
    /// is missing; a readable-but-unparseable transcript must not become an
    /// empty snapshot.
    pub parse: fn(&str) -> Result<UsageSnapshot>,
}

/// Run a PTY probe with the fixed two-attempt retry policy.
///
/// Attempt 1 uses the provider's base timeout. Attempt 2 runs after a short
/// fixed delay and gets a flat grace extension, absorbing slow terminal
/// redraws or a dropped first keystroke. Both the capture and the parse are
/// covered by the retry; the last error wins.
///
/// # Errors
///
/// `ToolNotInstalled` (before any spawn), or the final attempt's error.
pub async fn fetch_via_pty(ctx: &ProbeContext, spec: &PtyProbeSpec) -> Result<UsageSnapshot> {
    let Some(binary) = ctx.locator.resolve(spec.tool) else {
        return Err(MeterError::ToolNotInstalled {
            tool: spec.tool.to_string(),
        });
    };

    let base_timeout = spec.provider.default_timeout();
    let mut last_err: Option<MeterError> = None;

    for attempt in 0..2u8 {
        let timeout = if attempt == 0 {
            base_timeout
        } else {
            tokio::time::sleep(ctx.settings.retry_delay).await;
            base_timeout + ctx.settings.retry_grace
        };

        let request = PtyRequest {
            binary: binary.clone(),
            extra_args: Vec::new(),
            send: spec.command.to_string(),
            rows: ctx.settings.pty_rows,
            cols: ctx.settings.pty_cols,
            timeout,
        };

        match ctx.pty.run(request).await {
            Ok(capture) => {
                let clean = strip_ansi_codes(&capture.text);
                match (spec.parse)(&clean) {
                    Ok(snapshot) => return Ok(snapshot),
                    Err(e) => {
                        tracing::debug!(
                            provider = %spec.provider,
                            attempt,
                            error = %e,
                            "PTY transcript parse failed"
                        );
                        last_err = Some(e);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(
                    provider = %spec.provider,
                    attempt,
                    error = %e,
                    "PTY capture failed"
                );
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| MeterError::TimedOut {
        provider: spec.provider.id().to_string(),
        seconds: base_timeout.as_secs(),
    }))
}

/// Map a transcript with recognizable failure text to `ParseFailed` with
/// the classifier's hint as the reason.
pub(crate) fn parse_error_from_transcript(provider: Provider, text: &str) -> MeterError {
    let reason = extract_usage_error(text)
        .unwrap_or_else(|| "no usage data found in transcript".to_string());
    MeterError::ParseFailed {
        provider: provider.id().to_string(),
        reason,
    }
}

// =============================================================================
// Standard Plans
// =============================================================================

/// Assemble the fetch plan table for every provider. Built once at startup;
/// the orchestrator iterates the table rather than switching on provider
/// identity.
#[must_use]
pub fn standard_plans() -> HashMap<Provider, FetchPlan> {
    Provider::ALL.iter().map(|p| (*p, plan_for(*p))).collect()
}

/// The fetch plan for one provider.
#[must_use]
pub fn plan_for(provider: Provider) -> FetchPlan {
    match provider {
        Provider::Claude => claude::fetch_plan(),
        Provider::Codex => codex::fetch_plan(),
        Provider::Gemini => gemini::fetch_plan(),
        Provider::Cursor => cursor::fetch_plan(),
        Provider::Zai => zai::fetch_plan(),
        Provider::MiniMax => minimax::fetch_plan(),
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedPty, test_context_with_pty};
    use super::*;
    use crate::core::models::RateWindow;
    use crate::core::normalize::extract_percent;

    fn parse_session(text: &str) -> Result<UsageSnapshot> {
        extract_percent("session", text).map_or_else(
            || Err(parse_error_from_transcript(Provider::Claude, text)),
            |pct| {
                #[allow(clippy::cast_precision_loss)]
                Ok(UsageSnapshot::new(RateWindow::from_remaining(pct as f64)))
            },
        )
    }

    const SPEC: PtyProbeSpec = PtyProbeSpec {
        provider: Provider::Claude,
        tool: "claude",
        command: "/usage",
        parse: parse_session,
    };

    #[tokio::test]
    async fn missing_tool_fails_fast_without_spawn() {
        let pty = Arc::new(ScriptedPty::with_transcripts(vec!["session\n42% left".into()]));
        let mut ctx = test_context_with_pty(Arc::clone(&pty) as Arc<dyn PtyCommandRunner>);
        // Locator resolves nothing in the default test context.
        ctx.settings.retry_delay = Duration::from_millis(1);

        let err = fetch_via_pty(&ctx, &SPEC).await.unwrap_err();
        assert!(matches!(err, MeterError::ToolNotInstalled { .. }));
        assert_eq!(pty.request_count(), 0);
    }

    #[tokio::test]
    async fn retry_recovers_from_first_timeout() {
        let pty = Arc::new(ScriptedPty::with_script(vec![
            Err(()),
            Ok("Current session\n42% left".to_string()),
        ]));
        let mut ctx = test_context_with_pty(Arc::clone(&pty) as Arc<dyn PtyCommandRunner>);
        ctx.locator = testing::static_locator("claude");
        ctx.settings.retry_delay = Duration::from_millis(30);

        let start = tokio::time::Instant::now();
        let snapshot = fetch_via_pty(&ctx, &SPEC).await.expect("snapshot");
        let elapsed = start.elapsed();

        let primary = snapshot.primary.expect("primary");
        assert!((primary.remaining_percent - 42.0).abs() < f64::EPSILON);
        assert_eq!(pty.request_count(), 2);
        // The configured inter-attempt delay is a latency floor.
        assert!(elapsed >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn second_attempt_gets_the_grace_extension() {
        let pty = Arc::new(ScriptedPty::with_script(vec![
            Err(()),
            Ok("session\n10% left".to_string()),
        ]));
        let mut ctx = test_context_with_pty(Arc::clone(&pty) as Arc<dyn PtyCommandRunner>);
        ctx.locator = testing::static_locator("claude");
        ctx.settings.retry_delay = Duration::from_millis(1);
        ctx.settings.retry_grace = Duration::from_secs(7);

        fetch_via_pty(&ctx, &SPEC).await.expect("snapshot");

        let requests = pty.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].timeout,
            Provider::Claude.default_timeout() + Duration::from_secs(7)
        );
    }

    #[tokio::test]
    async fn both_attempts_failing_surfaces_last_error() {
        let pty = Arc::new(ScriptedPty::with_transcripts(vec![
            "no usage here".into(),
            "still no usage".into(),
        ]));
        let mut ctx = test_context_with_pty(Arc::clone(&pty) as Arc<dyn PtyCommandRunner>);
        ctx.locator = testing::static_locator("claude");
        ctx.settings.retry_delay = Duration::from_millis(1);

        let err = fetch_via_pty(&ctx, &SPEC).await.unwrap_err();
        assert!(matches!(err, MeterError::ParseFailed { .. }));
        assert_eq!(pty.request_count(), 2);
    }

    #[test]
    fn standard_plans_cover_every_provider() {
        let plans = standard_plans();
        for provider in Provider::ALL {
            let plan = plans.get(provider).expect("plan");
            assert_eq!(plan.provider, *provider);
            assert!(!plan.strategies.is_empty(), "{provider}");
        }
    }
}
