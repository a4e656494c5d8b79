//! Provider identities and metadata.
//!
//! The provider set is fixed at compile time; `Provider` is the map key for
//! every per-provider table in the store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MeterError, Result};

/// Supported assistant/billing providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Anthropic Claude Code (CLI PTY + OAuth hybrid).
    Claude,
    /// OpenAI Codex (CLI RPC + web dashboard hybrid).
    Codex,
    /// Google Gemini CLI (PTY scrape).
    Gemini,
    /// Cursor (cookie-authenticated web API).
    Cursor,
    /// z.ai token billing (API key).
    Zai,
    /// MiniMax token billing (API key).
    MiniMax,
}

impl Provider {
    /// All providers in display order.
    pub const ALL: &'static [Self] = &[
        Self::Claude,
        Self::Codex,
        Self::Gemini,
        Self::Cursor,
        Self::Zai,
        Self::MiniMax,
    ];

    /// Stable lowercase identifier; also the CLI binary name for PTY
    /// providers.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Cursor => "cursor",
            Self::Zai => "zai",
            Self::MiniMax => "minimax",
        }
    }

    /// Display name for human-facing output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini",
            Self::Cursor => "Cursor",
            Self::Zai => "z.ai",
            Self::MiniMax => "MiniMax",
        }
    }

    /// Parse from a stable identifier.
    pub fn from_id(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.id() == lower)
            .copied()
            .ok_or_else(|| MeterError::Config(format!("unknown provider: {name}")))
    }

    /// Hard per-probe timeout for this provider's fetch.
    #[must_use]
    pub const fn default_timeout(self) -> Duration {
        match self {
            // PTY probes wait for a full interactive redraw
            Self::Claude | Self::Gemini => Duration::from_secs(20),
            // Plain HTTP or CLI RPC
            Self::Cursor | Self::Zai | Self::MiniMax => Duration::from_secs(10),
            Self::Codex => Duration::from_secs(15),
        }
    }

    /// Whether this provider exposes a credit balance.
    #[must_use]
    pub const fn supports_credits(self) -> bool {
        matches!(self, Self::Codex)
    }

    /// Whether this provider has a local token/cost source.
    #[must_use]
    pub const fn supports_token_cost(self) -> bool {
        matches!(self, Self::Claude | Self::Codex)
    }

    /// statuspage.io base URL for health checks, if the provider has one.
    #[must_use]
    pub const fn status_page_url(self) -> Option<&'static str> {
        match self {
            Self::Codex => Some("https://status.openai.com"),
            Self::Claude => Some("https://status.anthropic.com"),
            Self::Gemini => Some("https://status.cloud.google.com"),
            Self::Cursor => Some("https://status.cursor.com"),
            Self::Zai | Self::MiniMax => None,
        }
    }

    /// Web dashboard domain used for cookie import, if any.
    #[must_use]
    pub const fn dashboard_domain(self) -> Option<&'static str> {
        match self {
            Self::Codex => Some("chatgpt.com"),
            Self::Cursor => Some("cursor.com"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}
