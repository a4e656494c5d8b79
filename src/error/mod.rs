//! Error types for meterbar.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Probe errors fall into three classes the orchestrator treats differently:
//! - **Fatal-for-this-cycle** (`ToolNotInstalled`, `ProcessSpawnFailed`):
//!   surfaced immediately, no prior-data grace.
//! - **Transient** (`ParseFailed`, `TimedOut`, network failures): subject to
//!   the consecutive-failure gate's one-flake suppression.
//! - **Identity-level** (`LoginRequired`, `AccountMismatch`,
//!   `NoDashboardData`): trigger a remediation hint and exactly one
//!   cookie-reimport-and-retry before being surfaced.
//!
//! Probes return typed errors only; the orchestrator is the sole place that
//! decides user visibility. The UI layer reads already-decided state.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeterError>;

// =============================================================================
// Cookie Import Errors
// =============================================================================

/// Outcome classification for a failed browser-cookie import.
///
/// Each variant maps to a distinct user-facing remediation hint so the user
/// can tell which browser/profile needs attention.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CookieImportError {
    /// Cookies were found, but none belong to the expected account.
    /// Carries every signed-in account discovered across all configured
    /// browsers for diagnostics.
    #[error("no browser session matches the expected account (found: {})", found_accounts.join(", "))]
    NoMatchingAccount { found_accounts: Vec<String> },

    /// No cookies for the target domain in any configured browser.
    #[error("no session cookies found in any configured browser")]
    NoCookiesFound,

    /// The OS denied access to a browser's cookie store.
    #[error("access to the {browser} cookie store was denied")]
    BrowserAccessDenied { browser: String },

    /// Cookies were imported but the dashboard still rejected the session.
    #[error("dashboard still requires login after cookie import")]
    DashboardStillRequiresLogin,

    /// A manually configured cookie header failed basic validation.
    #[error("manually configured cookie header is invalid")]
    ManualCookieHeaderInvalid,
}

impl CookieImportError {
    /// Remediation hint for display alongside the error.
    #[must_use]
    pub fn remediation_hint(&self) -> String {
        match self {
            Self::NoMatchingAccount { found_accounts } => {
                if found_accounts.is_empty() {
                    "Sign in to the dashboard in a supported browser, then retry.".to_string()
                } else {
                    format!(
                        "Sign in with the expected account in one of your browsers \
                         (currently signed in: {}).",
                        found_accounts.join(", ")
                    )
                }
            }
            Self::NoCookiesFound => {
                "Open the provider dashboard in a supported browser and sign in.".to_string()
            }
            Self::BrowserAccessDenied { browser } => format!(
                "Grant this app access to {browser}'s data in System Settings, or \
                 configure a manual cookie header."
            ),
            Self::DashboardStillRequiresLogin => {
                "The imported session has expired. Sign in to the dashboard again.".to_string()
            }
            Self::ManualCookieHeaderInvalid => {
                "Check the configured cookie header; it should be the raw `Cookie:` \
                 header value copied from a signed-in browser session."
                    .to_string()
            }
        }
    }
}

// =============================================================================
// Main Error Type
// =============================================================================

/// Main error type for meterbar operations.
#[derive(Error, Debug)]
pub enum MeterError {
    // ==========================================================================
    // Probe errors: environment
    // ==========================================================================
    /// The provider's CLI binary could not be resolved on PATH.
    /// Raised before any spawn attempt.
    #[error("CLI tool not installed: {tool}")]
    ToolNotInstalled { tool: String },

    /// A child process (PTY-backed or plain) failed to spawn.
    #[error("failed to spawn {binary}: {reason}")]
    ProcessSpawnFailed { binary: String, reason: String },

    // ==========================================================================
    // Probe errors: content
    // ==========================================================================
    /// The probe's transcript/response was readable but a mandatory field
    /// could not be extracted.
    #[error("failed to parse {provider} response: {reason}")]
    ParseFailed { provider: String, reason: String },

    /// A probe exceeded its hard wall-clock timeout.
    #[error("{provider} probe timed out after {seconds}s")]
    TimedOut { provider: String, seconds: u64 },

    // ==========================================================================
    // Probe errors: identity
    // ==========================================================================
    /// The web session is not (or no longer) authenticated.
    #[error("{provider} session requires login")]
    LoginRequired { provider: String },

    /// The web session belongs to a different account than the CLI-derived
    /// identity. Hard failure: wrong-account data must never be merged.
    #[error("account mismatch: expected {expected}, web session is {actual}")]
    AccountMismatch { expected: String, actual: String },

    /// The dashboard responded but carried no usable data. Could be an empty
    /// account or a broken session; retried like `LoginRequired`.
    #[error("{provider} dashboard returned no data")]
    NoDashboardData { provider: String },

    /// Cookie import failed with a classified outcome.
    #[error(transparent)]
    CookieImport(#[from] CookieImportError),

    // ==========================================================================
    // Network
    // ==========================================================================
    /// HTTP request returned a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Generic network failure (DNS, connect, TLS).
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Configuration / dispatch
    // ==========================================================================
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// No fetch strategy in the provider's plan was available.
    #[error("no available fetch strategy for provider: {0}")]
    NoAvailableStrategy(String),

    /// The requested source mode is not supported by the provider.
    #[error("unsupported source for provider {provider}: {source_mode}")]
    UnsupportedSource { provider: String, source_mode: String },

    // ==========================================================================
    // I/O
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MeterError {
    /// Whether this error is eligible for the failure gate's one-flake
    /// suppression. Fatal and identity errors are surfaced immediately.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ParseFailed { .. }
                | Self::TimedOut { .. }
                | Self::Http { .. }
                | Self::Network(_)
                | Self::NoDashboardData { .. }
        )
    }

    /// Whether this error class means the web session needs re-authentication
    /// and warrants the orchestrator's one-shot cookie-reimport-and-retry.
    #[must_use]
    pub const fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::LoginRequired { .. } | Self::NoDashboardData { .. }
        )
    }

    /// Short remediation hint distinguishing "needs re-login" from generic
    /// failure, for display under the provider card.
    #[must_use]
    pub fn user_hint(&self) -> Option<String> {
        match self {
            Self::ToolNotInstalled { tool } => {
                Some(format!("Install the `{tool}` CLI to enable this provider."))
            }
            Self::LoginRequired { provider } => {
                Some(format!("Sign in to {provider} again to restore usage data."))
            }
            Self::AccountMismatch { expected, .. } => Some(format!(
                "The browser session belongs to a different account; sign in as {expected}."
            )),
            Self::CookieImport(e) => Some(e.remediation_hint()),
            _ => None,
        }
    }
}
