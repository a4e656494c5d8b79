//! Shared harness for store integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use meterbar::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use meterbar::core::models::{
    CreditsSnapshot, OpenAIDashboardSnapshot, ProviderIdentity, RateWindow, TokenCostSnapshot,
    UsageSnapshot,
};
use meterbar::core::provider::Provider;
use meterbar::core::store::UsageStore;
use meterbar::error::{MeterError, Result};
use meterbar::probes::testing::ScriptedProbe;
use meterbar::probes::token_cost::TokenCostSource;
use meterbar::probes::codex::{CreditsProbe, DashboardProbe};
use meterbar::probes::{ProbeContext, UsageProbe};
use meterbar::storage::config::EngineConfig;

/// Snapshot with a primary window and an account email.
pub fn snapshot_with_email(remaining: f64, email: &str) -> UsageSnapshot {
    let mut snapshot = UsageSnapshot::new(RateWindow::from_remaining(remaining));
    snapshot.identity = Some(ProviderIdentity {
        account_email: Some(email.to_string()),
        account_organization: None,
        login_method: None,
    });
    snapshot
}

/// Wrap a probe in a one-strategy fetch plan.
pub fn plan_of(provider: Provider, probe: Arc<dyn UsageProbe>) -> FetchPlan {
    FetchPlan::new(
        provider,
        vec![FetchStrategy {
            id: "test",
            kind: FetchKind::Api,
            probe,
            is_available: |_| true,
            should_fallback: |_| false,
        }],
    )
}

/// Config with exactly these providers enabled.
pub fn config_enabling(providers: &[Provider]) -> EngineConfig {
    EngineConfig {
        enabled_providers: providers.to_vec(),
        ..EngineConfig::default()
    }
}

/// Probe that sleeps before succeeding; for overlap tests.
pub struct SlowProbe {
    provider: Provider,
    delay: std::time::Duration,
}

impl SlowProbe {
    pub fn new(provider: Provider, delay: std::time::Duration) -> Self {
        Self { provider, delay }
    }
}

#[async_trait]
impl UsageProbe for SlowProbe {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, _ctx: &ProbeContext) -> Result<UsageSnapshot> {
        tokio::time::sleep(self.delay).await;
        Ok(UsageSnapshot::new(RateWindow::from_remaining(50.0)))
    }
}

/// Token source counting fetches.
#[derive(Default)]
pub struct CountingTokenSource {
    pub calls: AtomicU32,
}

impl CountingTokenSource {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCostSource for CountingTokenSource {
    async fn fetch(&self, _provider: Provider) -> Result<TokenCostSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenCostSnapshot {
            session_tokens: Some(1234),
            session_cost_usd: None,
            last_30_days_tokens: Some(99_000),
            last_30_days_cost_usd: None,
            updated_at: Utc::now(),
        })
    }
}

/// One scripted dashboard outcome.
#[derive(Clone)]
pub enum DashOutcome {
    Snapshot(OpenAIDashboardSnapshot),
    LoginRequired,
    NoData,
}

impl DashOutcome {
    fn materialize(&self) -> Result<OpenAIDashboardSnapshot> {
        match self {
            Self::Snapshot(dash) => Ok(dash.clone()),
            Self::LoginRequired => Err(MeterError::LoginRequired {
                provider: "codex".to_string(),
            }),
            Self::NoData => Err(MeterError::NoDashboardData {
                provider: "codex".to_string(),
            }),
        }
    }
}

/// Dashboard probe replaying a script, then a fallback forever.
pub struct ScriptedDashboard {
    script: Mutex<VecDeque<DashOutcome>>,
    fallback: DashOutcome,
    pub calls: AtomicU32,
}

impl ScriptedDashboard {
    pub fn always(outcome: DashOutcome) -> Self {
        Self::with_script(vec![], outcome)
    }

    pub fn with_script(script: Vec<DashOutcome>, fallback: DashOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DashboardProbe for ScriptedDashboard {
    async fn fetch(
        &self,
        _ctx: &ProbeContext,
        _cookie_header: &str,
    ) -> Result<OpenAIDashboardSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.materialize()
    }
}

/// Dashboard snapshot signed in as `email`, carrying a secondary window and
/// credits to merge.
pub fn dashboard_signed_in(email: &str) -> OpenAIDashboardSnapshot {
    OpenAIDashboardSnapshot {
        signed_in_email: Some(email.to_string()),
        primary_limit: Some(RateWindow::from_remaining(61.0)),
        secondary_limit: Some(RateWindow::from_remaining(80.0)),
        credits_remaining: Some(12.5),
        account_plan: Some("pro".to_string()),
        updated_at: Utc::now(),
    }
}

/// Credits probe replaying balances; `None` entries fail.
pub struct ScriptedCredits {
    script: Mutex<VecDeque<Option<f64>>>,
    fallback: Option<f64>,
}

impl ScriptedCredits {
    pub fn with_script(script: Vec<Option<f64>>, fallback: Option<f64>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
        }
    }
}

#[async_trait]
impl CreditsProbe for ScriptedCredits {
    async fn fetch(&self, _ctx: &ProbeContext) -> Result<CreditsSnapshot> {
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        next.map(CreditsSnapshot::new)
            .ok_or_else(|| MeterError::Network("credits endpoint unreachable".to_string()))
    }
}

/// Context whose cookie source always yields a session for `email`.
pub fn context_with_session(email: &str) -> ProbeContext {
    use meterbar::core::http::build_client;
    use meterbar::probes::ProbeSettings;
    use meterbar::probes::testing::{ScriptedPty, StaticCookieSource, StaticLocator};

    ProbeContext::new(
        build_client(std::time::Duration::from_secs(5)).expect("test HTTP client"),
        Arc::new(ScriptedPty::with_transcripts(vec![])),
        Arc::new(StaticLocator::resolving(&[])),
        Arc::new(StaticCookieSource::new("session=abc", "Safari", Some(email))),
        ProbeSettings {
            retry_delay: std::time::Duration::from_millis(1),
            ..ProbeSettings::default()
        },
    )
}

/// Context whose PTY replays transcripts and whose locator resolves `tool`.
pub fn context_with_pty(tool: &str, transcripts: Vec<String>) -> ProbeContext {
    use meterbar::core::http::build_client;
    use meterbar::probes::ProbeSettings;
    use meterbar::probes::testing::{NullCookieSource, ScriptedPty, StaticLocator};

    ProbeContext::new(
        build_client(std::time::Duration::from_secs(5)).expect("test HTTP client"),
        Arc::new(ScriptedPty::with_transcripts(transcripts)),
        Arc::new(StaticLocator::resolving(&[tool])),
        Arc::new(NullCookieSource),
        ProbeSettings {
            retry_delay: std::time::Duration::from_millis(1),
            ..ProbeSettings::default()
        },
    )
}

/// Build a store over scripted collaborators.
pub struct StoreBuilder {
    pub config: EngineConfig,
    pub ctx: Arc<ProbeContext>,
    pub plans: HashMap<Provider, FetchPlan>,
    pub token_source: Arc<CountingTokenSource>,
    pub dashboard: Arc<ScriptedDashboard>,
}

impl StoreBuilder {
    pub fn new(providers: &[Provider]) -> Self {
        Self {
            config: config_enabling(providers),
            ctx: Arc::new(meterbar::probes::testing::test_context()),
            plans: HashMap::new(),
            token_source: Arc::new(CountingTokenSource::default()),
            dashboard: Arc::new(ScriptedDashboard::always(DashOutcome::NoData)),
        }
    }

    pub fn with_ctx(mut self, ctx: ProbeContext) -> Self {
        self.ctx = Arc::new(ctx);
        self
    }

    pub fn with_dashboard(mut self, dashboard: Arc<ScriptedDashboard>) -> Self {
        self.dashboard = dashboard;
        self
    }

    pub fn with_probe(mut self, provider: Provider, probe: ScriptedProbe) -> Self {
        self.plans.insert(provider, plan_of(provider, Arc::new(probe)));
        self
    }

    pub fn with_plan(mut self, plan: FetchPlan) -> Self {
        self.plans.insert(plan.provider, plan);
        self
    }

    pub fn build(self) -> UsageStore {
        UsageStore::new(
            &self.config,
            self.ctx,
            self.plans,
            self.token_source,
            self.dashboard,
        )
    }
}
