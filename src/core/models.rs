//! Canonical usage data models.
//!
//! Every probe normalizes its provider's response into these types. All
//! percentage clamping happens here, at construction time; the extraction
//! layer returns raw parsed values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Rate Window
// =============================================================================

/// Clamp a percentage into [0, 100], mapping non-finite input to 0.
fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// One quota window (session, weekly, model-tier).
///
/// Invariant: `used_percent` and `remaining_percent` are finite, clamped to
/// [0, 100], and complementary unless the source reported only one side.
/// Read-only once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateWindow {
    pub used_percent: f64,

    pub remaining_percent: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_description: Option<String>,
}

impl RateWindow {
    /// Construct from a "percent used" figure; remaining is the complement.
    #[must_use]
    pub fn from_used(used_percent: f64) -> Self {
        let used = clamp_percent(used_percent);
        Self {
            used_percent: used,
            remaining_percent: 100.0 - used,
            window_minutes: None,
            resets_at: None,
            reset_description: None,
        }
    }

    /// Construct from a "percent remaining" figure; used is the complement.
    #[must_use]
    pub fn from_remaining(remaining_percent: f64) -> Self {
        let remaining = clamp_percent(remaining_percent);
        Self {
            used_percent: 100.0 - remaining,
            remaining_percent: remaining,
            window_minutes: None,
            resets_at: None,
            reset_description: None,
        }
    }

    /// Attach a reset timestamp.
    #[must_use]
    pub const fn with_resets_at(mut self, resets_at: DateTime<Utc>) -> Self {
        self.resets_at = Some(resets_at);
        self
    }

    /// Attach a free-text reset description (e.g. "resets in 2h 15m").
    #[must_use]
    pub fn with_reset_description(mut self, description: impl Into<String>) -> Self {
        self.reset_description = Some(description.into());
        self
    }

    /// Attach the window duration in minutes.
    #[must_use]
    pub const fn with_window_minutes(mut self, minutes: i32) -> Self {
        self.window_minutes = Some(minutes);
        self
    }

    /// Whether the window is fully depleted.
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.remaining_percent <= 0.0
    }
}

// =============================================================================
// Provider Identity
// =============================================================================

/// Identity information for a provider account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_organization: Option<String>,

    /// Plan or login-method label (e.g. "pro", "oauth").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_method: Option<String>,
}

/// Normalize an account email for comparison: trimmed and lower-cased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// =============================================================================
// Usage Snapshot
// =============================================================================

/// The canonical per-provider result of one successful probe.
///
/// Created atomically by a successful probe, replaced wholesale on the next
/// success, never partially mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Primary quota window (usually the short session window).
    pub primary: Option<RateWindow>,

    /// Secondary window (usually weekly).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<RateWindow>,

    /// Tertiary, model-specific window (e.g. Opus tier).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tertiary: Option<RateWindow>,

    /// When this snapshot was captured.
    pub updated_at: DateTime<Utc>,

    /// Account identity information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ProviderIdentity>,

    /// Credit balance, for providers that expose one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<CreditsSnapshot>,

    /// Named per-limit detail windows beyond primary/secondary/tertiary.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rate_limit_detail: BTreeMap<String, RateWindow>,
}

impl UsageSnapshot {
    /// Create a snapshot with only a primary window, stamped now.
    #[must_use]
    pub fn new(primary: RateWindow) -> Self {
        Self {
            primary: Some(primary),
            secondary: None,
            tertiary: None,
            updated_at: Utc::now(),
            identity: None,
            credits: None,
            rate_limit_detail: BTreeMap::new(),
        }
    }

    /// Empty snapshot stamped now. Probes fill fields before returning.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            primary: None,
            secondary: None,
            tertiary: None,
            updated_at: Utc::now(),
            identity: None,
            credits: None,
            rate_limit_detail: BTreeMap::new(),
        }
    }

    /// The account email, if the probe learned one.
    #[must_use]
    pub fn account_email(&self) -> Option<&str> {
        self.identity.as_ref()?.account_email.as_deref()
    }
}

// =============================================================================
// Credits
// =============================================================================

/// Credit balance snapshot. Refreshed on its own cadence and cached across
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditsSnapshot {
    pub remaining: f64,
    pub updated_at: DateTime<Utc>,
}

impl CreditsSnapshot {
    #[must_use]
    pub fn new(remaining: f64) -> Self {
        Self {
            remaining,
            updated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Token / Cost
// =============================================================================

/// Token and cost totals, the slow secondary data source.
///
/// Refreshed sequentially on a TTL-gated cadence, never as part of the fast
/// usage fan-out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenCostSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_tokens: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_cost_usd: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_30_days_tokens: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_30_days_cost_usd: Option<f64>,

    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// OpenAI Dashboard
// =============================================================================

/// Secondary data scraped from the authenticated OpenAI web dashboard.
///
/// Carries its own signed-in email for identity-mismatch detection. Values
/// here only fill gaps in the canonical snapshot, never overwrite a value the
/// primary CLI/OAuth source already populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenAIDashboardSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_in_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_limit: Option<RateWindow>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_limit: Option<RateWindow>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_plan: Option<String>,

    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Status Pages
// =============================================================================

/// Status indicator from provider status pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusIndicator {
    #[default]
    None,
    Minor,
    Major,
    Critical,
    Maintenance,
    Unknown,
}

impl StatusIndicator {
    /// Parse from a statuspage.io indicator string.
    #[must_use]
    pub fn from_statuspage(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" | "operational" => Self::None,
            "minor" => Self::Minor,
            "major" => Self::Major,
            "critical" => Self::Critical,
            "maintenance" | "under_maintenance" => Self::Maintenance,
            _ => Self::Unknown,
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "Operational",
            Self::Minor => "Minor Issue",
            Self::Major => "Major Issue",
            Self::Critical => "Critical",
            Self::Maintenance => "Maintenance",
            Self::Unknown => "Unknown",
        }
    }
}

/// Provider status payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub indicator: StatusIndicator,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_from_used_complements() {
        let window = RateWindow::from_used(30.0);
        assert!((window.used_percent - 30.0).abs() < f64::EPSILON);
        assert!((window.remaining_percent - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_window_from_remaining_complements() {
        let window = RateWindow::from_remaining(42.0);
        assert!((window.remaining_percent - 42.0).abs() < f64::EPSILON);
        assert!((window.used_percent - 58.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_window_clamps_at_construction() {
        let over = RateWindow::from_used(130.0);
        assert!((over.used_percent - 100.0).abs() < f64::EPSILON);
        assert!((over.remaining_percent - 0.0).abs() < f64::EPSILON);

        let under = RateWindow::from_remaining(-5.0);
        assert!((under.remaining_percent - 0.0).abs() < f64::EPSILON);
        assert!((under.used_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_window_clamps_non_finite() {
        let nan = RateWindow::from_used(f64::NAN);
        assert!((nan.used_percent - 0.0).abs() < f64::EPSILON);
        assert!((nan.remaining_percent - 100.0).abs() < f64::EPSILON);

        let inf = RateWindow::from_remaining(f64::INFINITY);
        assert!((inf.remaining_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rate_window_depletion() {
        assert!(RateWindow::from_remaining(0.0).is_depleted());
        assert!(!RateWindow::from_remaining(0.5).is_depleted());
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }

    #[test]
    fn snapshot_account_email_reads_identity() {
        let mut snapshot = UsageSnapshot::new(RateWindow::from_remaining(50.0));
        assert!(snapshot.account_email().is_none());

        snapshot.identity = Some(ProviderIdentity {
            account_email: Some("a@x.com".into()),
            account_organization: None,
            login_method: None,
        });
        assert_eq!(snapshot.account_email(), Some("a@x.com"));
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snapshot = UsageSnapshot::new(
            RateWindow::from_remaining(42.0).with_reset_description("resets in 3h"),
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("remainingPercent"));
        assert!(json.contains("updatedAt"));
        assert!(json.contains("resetDescription"));
        // Unset optionals are omitted entirely.
        assert!(!json.contains("tertiary"));
    }

    #[test]
    fn status_indicator_parse() {
        assert_eq!(
            StatusIndicator::from_statuspage("operational"),
            StatusIndicator::None
        );
        assert_eq!(
            StatusIndicator::from_statuspage("minor"),
            StatusIndicator::Minor
        );
        assert_eq!(
            StatusIndicator::from_statuspage("garbage"),
            StatusIndicator::Unknown
        );
    }

    #[test]
    fn dashboard_snapshot_roundtrips() {
        let snap = OpenAIDashboardSnapshot {
            signed_in_email: Some("a@x.com".into()),
            primary_limit: Some(RateWindow::from_remaining(61.0)),
            secondary_limit: None,
            credits_remaining: Some(12.5),
            account_plan: Some("pro".into()),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: OpenAIDashboardSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
