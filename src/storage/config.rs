//! Engine settings.
//!
//! The small, durable knobs the host app exposes: which providers are
//! enabled, refresh cadences, notification toggles, API keys for
//! token-billing providers, and an optional manual cookie header. Stored as
//! TOML under the config directory.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

fn default_refresh_secs() -> u64 {
    120
}

fn default_token_cost_ttl_secs() -> u64 {
    3600
}

fn default_dashboard_multiplier() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_enabled_providers() -> Vec<Provider> {
    vec![Provider::Claude, Provider::Codex]
}

/// Durable engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Providers the user has switched on.
    pub enabled_providers: Vec<Provider>,

    /// Base usage-refresh interval, seconds.
    pub refresh_interval_secs: u64,

    /// TTL for the slow token/cost source, seconds.
    pub token_cost_ttl_secs: u64,

    /// Dashboard refresh runs at most once per this multiple of the base
    /// interval.
    pub dashboard_interval_multiplier: u32,

    /// Whether depletion notifications fire.
    pub notifications_enabled: bool,

    /// Manually configured `Cookie:` header, overriding browser import.
    pub manual_cookie_header: Option<String>,

    /// API keys for token-billing providers.
    pub api_keys: HashMap<Provider, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled_providers: default_enabled_providers(),
            refresh_interval_secs: default_refresh_secs(),
            token_cost_ttl_secs: default_token_cost_ttl_secs(),
            dashboard_interval_multiplier: default_dashboard_multiplier(),
            notifications_enabled: default_true(),
            manual_cookie_header: None,
            api_keys: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// `Config` on unreadable or unparseable content.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| MeterError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| MeterError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Persist to a TOML file.
    ///
    /// # Errors
    ///
    /// `Config` on serialization failure, `Io` on write failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MeterError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Base refresh interval.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Token/cost TTL.
    #[must_use]
    pub const fn token_cost_ttl(&self) -> Duration {
        Duration::from_secs(self.token_cost_ttl_secs)
    }

    /// Whether a provider is enabled.
    #[must_use]
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled_providers.contains(&provider)
    }
}
