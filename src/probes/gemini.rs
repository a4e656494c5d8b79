//! Gemini CLI probe.
//!
//! Drives `gemini` through a PTY and types `/stats`, which renders a
//! per-model usage table:
//!
//! ```text
//!   Model Usage                 Reqs                  Usage left
//!   ────────────────────────────────────────────────────────────
//!   gemini-2.5-flash               -   99.3% (Resets in 23h 18m)
//!   gemini-3-pro-preview           -      100.0% (Resets in 24h)
//! ```
//!
//! The daily quota is the most constrained row: the lowest "usage left"
//! percentage, with that row's reset countdown.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{ProbeContext, PtyProbeSpec, UsageProbe, fetch_via_pty, parse_error_from_transcript};
use crate::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use crate::core::models::{RateWindow, UsageSnapshot};
use crate::core::provider::Provider;
use crate::error::Result;
use crate::util::time::parse_reset_duration;

/// CLI binary name.
const CLI_NAME: &str = "gemini";

/// Slash-command that renders the usage table.
const STATS_COMMAND: &str = "/stats";

/// Create the fetch plan for Gemini.
#[must_use]
pub fn fetch_plan() -> FetchPlan {
    FetchPlan::new(
        Provider::Gemini,
        vec![FetchStrategy {
            id: "gemini-cli-pty",
            kind: FetchKind::CliPty,
            probe: Arc::new(GeminiPtyProbe),
            is_available: |ctx| ctx.locator.resolve(CLI_NAME).is_some(),
            should_fallback: |_| false,
        }],
    )
}

/// CLI PTY probe: `gemini` + `/stats`.
pub struct GeminiPtyProbe;

#[async_trait]
impl UsageProbe for GeminiPtyProbe {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn fetch(&self, ctx: &ProbeContext) -> Result<UsageSnapshot> {
        fetch_via_pty(
            ctx,
            &PtyProbeSpec {
                provider: Provider::Gemini,
                tool: CLI_NAME,
                command: STATS_COMMAND,
                parse: parse_stats_transcript,
            },
        )
        .await
    }
}

/// Parse the stripped `/stats` table.
///
/// Rows look like `"<model>  -  <N>% (Resets in <duration>)"` where the
/// percentage is usage *left*. The lowest row wins; its reset countdown
/// rides along. A transcript with no such row is `ParseFailed`.
pub fn parse_stats_transcript(text: &str) -> Result<UsageSnapshot> {
    let mut lowest_remaining: Option<f64> = None;
    let mut lowest_line: Option<&str> = None;

    for line in text.lines() {
        if !(line.contains('%') && line.to_lowercase().contains("resets")) {
            continue;
        }
        let Some(pct) = line
            .split_whitespace()
            .find_map(|part| part.strip_suffix('%'))
            .and_then(|raw| raw.parse::<f64>().ok())
        else {
            continue;
        };
        if lowest_remaining.is_none_or(|current| pct < current) {
            lowest_remaining = Some(pct);
            lowest_line = Some(line);
        }
    }

    let Some(remaining) = lowest_remaining else {
        return Err(parse_error_from_transcript(Provider::Gemini, text));
    };

    let mut primary = RateWindow::from_remaining(remaining).with_window_minutes(24 * 60);
    if let Some(line) = lowest_line {
        if let Some(duration) = parse_reset_duration(line) {
            let resets_at = Utc::now()
                + chrono::Duration::seconds(i64::try_from(duration.as_secs()).unwrap_or(0));
            primary = primary.with_resets_at(resets_at);
        }
    }

    Ok(UsageSnapshot::new(primary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterError;

    const STATS_TABLE: &str = "
  Model Usage                 Reqs                  Usage left
  ────────────────────────────────────────────────────────────
  gemini-2.5-flash               -   99.3% (Resets in 23h 18m)
  gemini-2.5-pro                 -    25.5% (Resets in 6h)
  gemini-3-pro-preview           -      100.0% (Resets in 24h)
";

    #[test]
    fn lowest_usage_left_row_wins() {
        let snapshot = parse_stats_transcript(STATS_TABLE).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        assert!((primary.remaining_percent - 25.5).abs() < f64::EPSILON);
        assert!((primary.used_percent - 74.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_countdown_comes_from_the_winning_row() {
        let snapshot = parse_stats_transcript(STATS_TABLE).expect("snapshot");
        let primary = snapshot.primary.expect("primary");
        let resets_at = primary.resets_at.expect("resets_at");
        let secs = resets_at.signed_duration_since(Utc::now()).num_seconds();
        // The 25.5% row resets in 6h.
        assert!((secs - 6 * 3600).abs() < 60, "got {secs}s");
    }

    #[test]
    fn table_without_usage_rows_is_parse_failed() {
        let err = parse_stats_transcript("Type your message\n>>>").unwrap_err();
        assert!(matches!(err, MeterError::ParseFailed { .. }));
    }

    #[test]
    fn rows_without_resets_are_ignored() {
        // A stray percentage outside the usage table must not be mistaken
        // for quota data.
        let err = parse_stats_transcript("progress: 50% complete\n").unwrap_err();
        assert!(matches!(err, MeterError::ParseFailed { .. }));
    }

    #[test]
    fn plan_is_pty_only() {
        let plan = fetch_plan();
        assert_eq!(plan.strategies.len(), 1);
        assert_eq!(plan.strategies[0].kind, FetchKind::CliPty);
    }
}
