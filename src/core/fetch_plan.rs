//! Per-provider fetch strategy tables.
//!
//! Each provider gets an ordered list of strategy records assembled once at
//! startup; the orchestrator iterates the table instead of switching on
//! provider identity inline. Adding a provider means adding a table entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::models::UsageSnapshot;
use super::provider::Provider;
use crate::error::{MeterError, Result};
use crate::probes::{ProbeContext, UsageProbe};

// =============================================================================
// Fetch Kind
// =============================================================================

/// Kind of fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchKind {
    /// Interactive CLI driven through a pseudo-terminal.
    CliPty,
    /// CLI with a machine-readable subcommand.
    CliRpc,
    /// OAuth/API-token authenticated endpoint.
    Api,
    /// Cookie-authenticated web endpoint.
    Web,
}

impl FetchKind {
    /// Source label recorded with snapshots and attempts.
    #[must_use]
    pub const fn source_label(self) -> &'static str {
        match self {
            Self::CliPty => "cli-pty",
            Self::CliRpc => "cli",
            Self::Api => "api",
            Self::Web => "web",
        }
    }
}

// =============================================================================
// Fetch Strategy
// =============================================================================

/// One entry in a provider's fetch plan.
pub struct FetchStrategy {
    /// Unique ID for this strategy.
    pub id: &'static str,
    /// Kind of fetch.
    pub kind: FetchKind,
    /// The probe that executes this strategy.
    pub probe: Arc<dyn UsageProbe>,
    /// Whether this strategy can run in the current environment.
    pub is_available: fn(&ProbeContext) -> bool,
    /// Whether a failure of this strategy should fall through to the next.
    pub should_fallback: fn(&MeterError) -> bool,
}

impl std::fmt::Debug for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchStrategy")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Fetch Attempt
// =============================================================================

/// Audit record of one strategy attempt within a refresh cycle.
///
/// The store keeps a bounded per-provider list for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFetchAttempt {
    pub provider: Provider,
    pub strategy_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Fetch Outcome
// =============================================================================

/// Result of executing a provider's fetch plan.
#[derive(Debug)]
pub struct FetchOutcome {
    pub provider: Provider,
    pub result: Result<UsageSnapshot>,
    pub attempts: Vec<ProviderFetchAttempt>,
    pub source_label: String,
}

impl FetchOutcome {
    #[must_use]
    pub fn success(
        provider: Provider,
        snapshot: UsageSnapshot,
        source: &str,
        attempts: Vec<ProviderFetchAttempt>,
    ) -> Self {
        Self {
            provider,
            result: Ok(snapshot),
            attempts,
            source_label: source.to_string(),
        }
    }

    #[must_use]
    pub const fn failure(
        provider: Provider,
        error: MeterError,
        attempts: Vec<ProviderFetchAttempt>,
    ) -> Self {
        Self {
            provider,
            result: Err(error),
            attempts,
            source_label: String::new(),
        }
    }

    /// Whether the fetch succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

// =============================================================================
// Fetch Plan
// =============================================================================

/// Ordered strategies to try for one provider.
#[derive(Debug)]
pub struct FetchPlan {
    pub provider: Provider,
    pub strategies: Vec<FetchStrategy>,
}

impl FetchPlan {
    #[must_use]
    pub const fn new(provider: Provider, strategies: Vec<FetchStrategy>) -> Self {
        Self {
            provider,
            strategies,
        }
    }

    /// Execute strategies in order until one succeeds or none remain.
    ///
    /// Unavailable strategies are skipped without an attempt record. A
    /// strategy whose failure is not fallback-eligible ends the plan with
    /// that error.
    pub async fn execute(&self, ctx: &ProbeContext) -> FetchOutcome {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            if !(strategy.is_available)(ctx) {
                tracing::debug!(
                    provider = %self.provider,
                    strategy = strategy.id,
                    "strategy not available, skipping"
                );
                continue;
            }

            tracing::debug!(
                provider = %self.provider,
                strategy = strategy.id,
                "trying fetch strategy"
            );

            let started_at = Utc::now();
            let start = Instant::now();
            let result = strategy.probe.fetch(ctx).await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            attempts.push(ProviderFetchAttempt {
                provider: self.provider,
                strategy_id: strategy.id.to_string(),
                source: strategy.kind.source_label().to_string(),
                started_at,
                duration_ms,
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
            });

            match result {
                Ok(snapshot) => {
                    tracing::info!(
                        provider = %self.provider,
                        strategy = strategy.id,
                        duration_ms,
                        "fetch succeeded"
                    );
                    return FetchOutcome::success(
                        self.provider,
                        snapshot,
                        strategy.kind.source_label(),
                        attempts,
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %self.provider,
                        strategy = strategy.id,
                        error = %e,
                        "fetch failed"
                    );
                    if !(strategy.should_fallback)(&e) {
                        return FetchOutcome::failure(self.provider, e, attempts);
                    }
                }
            }
        }

        FetchOutcome::failure(
            self.provider,
            MeterError::NoAvailableStrategy(self.provider.id().to_string()),
            attempts,
        )
    }
}
