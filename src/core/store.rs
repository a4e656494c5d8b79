//! Usage store / refresh orchestrator.
//!
//! The single source of truth for all provider state. Probes are pure
//! functions; the store is the only component that mutates the per-provider
//! maps, and it does so exclusively from its own refresh tasks. The UI
//! layer reads already-decided state through the query methods and observes
//! the watch channel for re-render triggers.
//!
//! Refresh structure per cycle:
//! 1. Concurrent fan-out: one usage task per enabled provider, one
//!    status-page task, one auxiliary credits task; all awaited together.
//! 2. Token/cost refresh: sequential, TTL-gated, never part of the fan-out.
//! 3. Dashboard reconciliation: sequenced after the fan-out (it needs the
//!    just-refreshed account identity), rate-limited at a multiple of the
//!    base interval.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, watch};

use super::failure_gate::ConsecutiveFailureGate;
use super::fetch_plan::{FetchOutcome, FetchPlan, ProviderFetchAttempt};
use super::models::{
    CreditsSnapshot, OpenAIDashboardSnapshot, StatusPayload, TokenCostSnapshot, UsageSnapshot,
    normalize_email,
};
use super::provider::Provider;
use super::status::StatusFetcher;
use crate::cookies::reconcile::{merge_dashboard_into_snapshot, verify_dashboard_identity};
use crate::error::MeterError;
use crate::probes::codex::{CreditsProbe, DashboardProbe};
use crate::probes::token_cost::TokenCostSource;
use crate::probes::ProbeContext;
use crate::storage::cache::{CachedUsage, SnapshotCache};
use crate::storage::config::EngineConfig;

/// Bound on the per-provider fetch-attempt audit trail.
const MAX_ATTEMPT_HISTORY: usize = 20;

/// Extra outer-timeout headroom beyond the probe's own retry budget.
const OUTER_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

// =============================================================================
// Events and Settings
// =============================================================================

/// One-shot events the store emits for the notification layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageEvent {
    /// The primary window crossed from remaining to depleted. Emitted
    /// exactly at the transition edge, not on every poll while depleted.
    SessionDepleted { provider: Provider },
}

/// Runtime-adjustable orchestration settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub refresh_interval: Duration,
    pub token_cost_ttl: Duration,
    pub dashboard_interval_multiplier: u32,
    pub notifications_enabled: bool,
}

impl StoreSettings {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval(),
            token_cost_ttl: config.token_cost_ttl(),
            dashboard_interval_multiplier: config.dashboard_interval_multiplier,
            notifications_enabled: config.notifications_enabled,
        }
    }
}

// =============================================================================
// Per-Provider State
// =============================================================================

#[derive(Default)]
struct ProviderSlot {
    enabled: bool,
    snapshot: Option<UsageSnapshot>,
    /// Gate-surfaced error text. `None` while a single flake is absorbed.
    error: Option<String>,
    hint: Option<String>,
    source: Option<String>,
    status: Option<StatusPayload>,
    token_cost: Option<TokenCostSnapshot>,
    gate: ConsecutiveFailureGate,
    attempts: VecDeque<ProviderFetchAttempt>,
    last_primary_remaining: Option<f64>,
}

struct Inner {
    slots: HashMap<Provider, ProviderSlot>,
    credits: Option<CreditsSnapshot>,
    dashboard: Option<OpenAIDashboardSnapshot>,
    dashboard_requires_login: bool,
    last_dashboard_email: Option<String>,
    last_dashboard_fetch: Option<Instant>,
    token_last_refresh: HashMap<Provider, Instant>,
    token_inflight: HashSet<Provider>,
}

// =============================================================================
// Usage Store
// =============================================================================

/// The refresh orchestrator. Construct once, share behind an [`Arc`].
pub struct UsageStore {
    inner: RwLock<Inner>,
    plans: HashMap<Provider, FetchPlan>,
    ctx: Arc<ProbeContext>,
    token_source: Arc<dyn TokenCostSource>,
    dashboard_probe: Arc<dyn DashboardProbe>,
    credits_probe: Option<Arc<dyn CreditsProbe>>,
    status_fetcher: Option<StatusFetcher>,
    cache: Option<SnapshotCache>,
    settings: RwLock<StoreSettings>,
    is_refreshing: AtomicBool,
    fan_out_count: AtomicU64,
    changed_tx: watch::Sender<u64>,
    events_tx: mpsc::UnboundedSender<UsageEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<UsageEvent>>>,
}

impl UsageStore {
    /// Build a store over the given fetch plans and collaborators.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        ctx: Arc<ProbeContext>,
        plans: HashMap<Provider, FetchPlan>,
        token_source: Arc<dyn TokenCostSource>,
        dashboard_probe: Arc<dyn DashboardProbe>,
    ) -> Self {
        let slots = Provider::ALL
            .iter()
            .map(|p| {
                (
                    *p,
                    ProviderSlot {
                        enabled: config.is_enabled(*p),
                        ..ProviderSlot::default()
                    },
                )
            })
            .collect();

        let (changed_tx, _) = watch::channel(0);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            inner: RwLock::new(Inner {
                slots,
                credits: None,
                dashboard: None,
                dashboard_requires_login: false,
                last_dashboard_email: None,
                last_dashboard_fetch: None,
                token_last_refresh: HashMap::new(),
                token_inflight: HashSet::new(),
            }),
            plans,
            ctx,
            token_source,
            dashboard_probe,
            credits_probe: None,
            status_fetcher: None,
            cache: None,
            settings: RwLock::new(StoreSettings::from_config(config)),
            is_refreshing: AtomicBool::new(false),
            fan_out_count: AtomicU64::new(0),
            changed_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Attach the auxiliary credits probe.
    #[must_use]
    pub fn with_credits_probe(mut self, probe: Arc<dyn CreditsProbe>) -> Self {
        self.credits_probe = Some(probe);
        self
    }

    /// Attach status-page health checks.
    #[must_use]
    pub fn with_status_fetcher(mut self, fetcher: StatusFetcher) -> Self {
        self.status_fetcher = Some(fetcher);
        self
    }

    /// Attach the persisted snapshot cache.
    #[must_use]
    pub fn with_cache(mut self, cache: SnapshotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Run one full refresh cycle.
    ///
    /// Returns `false` without starting anything when a refresh is already
    /// in flight; overlapping cycles are short-circuited, not queued.
    pub async fn refresh(&self, force_token_usage: bool) -> bool {
        if self
            .is_refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("refresh already in flight, short-circuiting");
            return false;
        }

        self.fan_out_count.fetch_add(1, Ordering::SeqCst);
        self.run_cycle(force_token_usage).await;
        self.is_refreshing.store(false, Ordering::SeqCst);
        self.notify_changed();
        true
    }

    /// Whether a refresh cycle is currently running.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.is_refreshing.load(Ordering::SeqCst)
    }

    /// How many fan-outs have started. Used to verify refresh idempotence.
    #[must_use]
    pub fn fan_out_count(&self) -> u64 {
        self.fan_out_count.load(Ordering::SeqCst)
    }

    async fn run_cycle(&self, force_token_usage: bool) {
        let providers = self.enabled_providers();

        let usage_futures = providers.iter().map(|p| self.fetch_usage_one(*p));
        let status_future = self.fetch_statuses(&providers);
        let credits_future = self.fetch_credits();

        let (outcomes, statuses, credits) =
            tokio::join!(join_all(usage_futures), status_future, credits_future);

        let mut cache_writes = Vec::new();
        for outcome in outcomes {
            if let Some(entry) = self.apply_outcome(outcome) {
                cache_writes.push(entry);
            }
        }
        self.apply_statuses(statuses);
        if let Some(credits) = credits {
            self.inner.write().expect("store lock").credits = Some(credits);
        }

        if let Some(cache) = &self.cache {
            for entry in cache_writes {
                if let Err(e) = cache.write(&entry) {
                    tracing::warn!(provider = %entry.provider, error = %e, "cache write failed");
                }
            }
        }

        // Slow secondary sources run strictly after the fan-out.
        self.refresh_token_costs(&providers, force_token_usage).await;
        self.refresh_dashboard(false).await;
    }

    async fn fetch_usage_one(&self, provider: Provider) -> FetchOutcome {
        let Some(plan) = self.plans.get(&provider) else {
            return FetchOutcome::failure(
                provider,
                MeterError::NoAvailableStrategy(provider.id().to_string()),
                Vec::new(),
            );
        };

        // Outer deadline covers the probe's internal two-attempt budget; a
        // hung PTY must produce a typed timeout, not a stuck fan-out slot.
        let outer = provider.default_timeout() * 2
            + self.ctx.settings.retry_grace
            + self.ctx.settings.retry_delay
            + OUTER_TIMEOUT_SLACK;

        match tokio::time::timeout(outer, plan.execute(&self.ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::failure(
                provider,
                MeterError::TimedOut {
                    provider: provider.id().to_string(),
                    seconds: outer.as_secs(),
                },
                Vec::new(),
            ),
        }
    }

    async fn fetch_statuses(&self, providers: &[Provider]) -> Vec<(Provider, StatusPayload)> {
        let Some(fetcher) = &self.status_fetcher else {
            return Vec::new();
        };

        let futures = providers.iter().filter_map(|p| {
            p.status_page_url().map(|url| async move {
                match fetcher.fetch(url).await {
                    Ok(payload) => Some((*p, payload)),
                    Err(e) => {
                        tracing::debug!(provider = %p, error = %e, "status fetch failed");
                        None
                    }
                }
            })
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    async fn fetch_credits(&self) -> Option<CreditsSnapshot> {
        let probe = self.credits_probe.as_ref()?;
        let supported = {
            let inner = self.inner.read().expect("store lock");
            Provider::ALL.iter().any(|p| {
                p.supports_credits() && inner.slots.get(p).is_some_and(|slot| slot.enabled)
            })
        };
        if !supported {
            return None;
        }

        match probe.fetch(&self.ctx).await {
            Ok(credits) => Some(credits),
            Err(e) => {
                // Cached credits survive failures.
                tracing::debug!(error = %e, "credits fetch failed, keeping cached value");
                None
            }
        }
    }

    /// Apply one provider outcome. Returns a cache entry on success.
    fn apply_outcome(&self, outcome: FetchOutcome) -> Option<CachedUsage> {
        let notifications_enabled = self
            .settings
            .read()
            .expect("settings lock")
            .notifications_enabled;

        let mut inner = self.inner.write().expect("store lock");
        let slot = inner.slots.get_mut(&outcome.provider)?;

        // A provider disabled while its probe was in flight: the late
        // result is discarded, never applied.
        if !slot.enabled {
            tracing::debug!(provider = %outcome.provider, "discarding result for disabled provider");
            return None;
        }

        for attempt in outcome.attempts {
            if slot.attempts.len() == MAX_ATTEMPT_HISTORY {
                slot.attempts.pop_front();
            }
            slot.attempts.push_back(attempt);
        }

        match outcome.result {
            Ok(snapshot) => {
                let new_remaining = snapshot.primary.as_ref().map(|w| w.remaining_percent);
                if notifications_enabled {
                    if let (Some(prev), Some(new)) = (slot.last_primary_remaining, new_remaining) {
                        if prev > 0.0 && new <= 0.0 {
                            let _ = self.events_tx.send(UsageEvent::SessionDepleted {
                                provider: outcome.provider,
                            });
                        }
                    }
                }
                slot.last_primary_remaining = new_remaining;

                let email = snapshot.account_email().map(String::from);
                slot.snapshot = Some(snapshot.clone());
                slot.error = None;
                slot.hint = None;
                slot.source = Some(outcome.source_label.clone());
                slot.gate.record_success();

                if outcome.provider.supports_credits() {
                    if let Some(credits) = snapshot.credits.clone() {
                        inner.credits = Some(credits);
                    }
                }
                self.ctx.set_expected_email(outcome.provider, email.clone());

                Some(CachedUsage {
                    provider: outcome.provider,
                    account_email: email,
                    source: outcome.source_label,
                    snapshot,
                })
            }
            Err(error) => {
                let surfaced = slot.gate.record_failure(error.is_transient());
                if surfaced {
                    slot.error = Some(error.to_string());
                    slot.hint = error.user_hint();
                    tracing::warn!(
                        provider = %outcome.provider,
                        streak = slot.gate.streak(),
                        error = %error,
                        "provider error surfaced"
                    );
                } else {
                    // One flake with prior good data: absorb silently, keep
                    // showing the last-good numbers.
                    slot.error = None;
                    slot.hint = None;
                    tracing::debug!(
                        provider = %outcome.provider,
                        error = %error,
                        "transient failure suppressed by gate"
                    );
                }
                None
            }
        }
    }

    fn apply_statuses(&self, statuses: Vec<(Provider, StatusPayload)>) {
        if statuses.is_empty() {
            return;
        }
        let mut inner = self.inner.write().expect("store lock");
        for (provider, payload) in statuses {
            if let Some(slot) = inner.slots.get_mut(&provider) {
                if slot.enabled {
                    slot.status = Some(payload);
                }
            }
        }
    }

    // =========================================================================
    // Token / Cost
    // =========================================================================

    /// Refresh token/cost data for every enabled provider that has a local
    /// source. Sequential; used by the token-cost timer and manual refresh.
    pub async fn refresh_token_usage(&self, force: bool) {
        let providers = self.enabled_providers();
        self.refresh_token_costs(&providers, force).await;
        self.notify_changed();
    }

    async fn refresh_token_costs(&self, providers: &[Provider], force: bool) {
        // Sequential by design: the token source is expensive and must not
        // compete with the fast quota path.
        for provider in providers {
            if !provider.supports_token_cost() {
                continue;
            }
            self.refresh_token_cost(*provider, force).await;
        }
    }

    /// Refresh one provider's token/cost snapshot, honoring the TTL unless
    /// forced. A refresh already in flight for the same provider drops the
    /// new request rather than queueing it. Returns whether a fetch ran.
    pub async fn refresh_token_cost(&self, provider: Provider, force: bool) -> bool {
        let ttl = self.settings.read().expect("settings lock").token_cost_ttl;
        {
            let mut inner = self.inner.write().expect("store lock");
            let enabled = inner.slots.get(&provider).is_some_and(|s| s.enabled);
            if !enabled {
                return false;
            }
            if !force {
                let fresh = inner
                    .token_last_refresh
                    .get(&provider)
                    .is_some_and(|at| at.elapsed() < ttl);
                if fresh {
                    return false;
                }
            }
            if !inner.token_inflight.insert(provider) {
                tracing::debug!(provider = %provider, "token refresh already running, dropping");
                return false;
            }
        }

        let result = self.token_source.fetch(provider).await;

        let mut inner = self.inner.write().expect("store lock");
        inner.token_inflight.remove(&provider);
        match result {
            Ok(snapshot) => {
                inner.token_last_refresh.insert(provider, Instant::now());
                if let Some(slot) = inner.slots.get_mut(&provider) {
                    if slot.enabled {
                        slot.token_cost = Some(snapshot);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(provider = %provider, error = %e, "token cost refresh failed");
            }
        }
        true
    }

    // =========================================================================
    // Dashboard Reconciliation
    // =========================================================================

    /// Refresh the web dashboard and reconcile it with the primary source.
    ///
    /// Rate-limited to once per `multiplier ×` base interval unless forced.
    /// Runs only once the primary source has produced an account identity.
    pub async fn refresh_dashboard(&self, force: bool) {
        let Some(domain) = Provider::Codex.dashboard_domain() else {
            return;
        };

        let (interval, multiplier) = {
            let settings = self.settings.read().expect("settings lock");
            (
                settings.refresh_interval,
                settings.dashboard_interval_multiplier,
            )
        };

        let expected = {
            let inner = self.inner.read().expect("store lock");
            let slot = inner.slots.get(&Provider::Codex);
            if !slot.is_some_and(|s| s.enabled) {
                return;
            }
            slot.and_then(|s| s.snapshot.as_ref())
                .and_then(|s| s.account_email())
                .map(String::from)
        };
        // Data dependency: the scrape needs the just-refreshed identity.
        let Some(expected) = expected else {
            return;
        };
        let expected_norm = normalize_email(&expected);

        let mut force_import = force;
        {
            let mut inner = self.inner.write().expect("store lock");

            // Identity change since the last successful dashboard fetch:
            // drop the cached dashboard and force a fresh cookie import.
            // Another user's cached dashboard must never be served.
            if inner
                .last_dashboard_email
                .as_ref()
                .is_some_and(|last| *last != expected_norm)
            {
                tracing::info!("primary account changed, invalidating cached dashboard");
                inner.dashboard = None;
                inner.last_dashboard_email = None;
                force_import = true;
            }

            if !force {
                let throttled = inner.last_dashboard_fetch.is_some_and(|at| {
                    at.elapsed() < interval * multiplier
                });
                if throttled {
                    return;
                }
            }
            inner.last_dashboard_fetch = Some(Instant::now());
        }

        let import = match self
            .ctx
            .cookies
            .cookie_header(domain, Some(&expected), force_import)
        {
            Ok(import) => import,
            Err(e) => {
                tracing::debug!(error = %e, "dashboard cookie import failed");
                self.inner.write().expect("store lock").dashboard_requires_login = true;
                return;
            }
        };

        let mut result = self.dashboard_probe.fetch(&self.ctx, &import.header).await;

        // One cookie re-import-and-retry for session-level failures; the
        // probe itself is stateless per call.
        if result.as_ref().err().is_some_and(MeterError::needs_reauth) {
            tracing::debug!("dashboard session rejected, re-importing cookies once");
            result = match self.ctx.cookies.cookie_header(domain, Some(&expected), true) {
                Ok(retry_import) => self
                    .dashboard_probe
                    .fetch(&self.ctx, &retry_import.header)
                    .await
                    .map_err(|e| {
                        if e.needs_reauth() {
                            // Freshly imported cookies and still rejected.
                            crate::error::CookieImportError::DashboardStillRequiresLogin.into()
                        } else {
                            e
                        }
                    }),
                Err(e) => Err(e.into()),
            };
        }

        match result {
            Ok(dashboard) => {
                if let Err(e) = verify_dashboard_identity(&expected, &dashboard) {
                    tracing::warn!(error = %e, "dashboard account mismatch, refusing to merge");
                    let mut inner = self.inner.write().expect("store lock");
                    inner.dashboard = None;
                    inner.dashboard_requires_login = true;
                    return;
                }

                let mut inner = self.inner.write().expect("store lock");
                inner.dashboard_requires_login = false;
                inner.last_dashboard_email = Some(expected_norm);
                inner.dashboard = Some(dashboard.clone());

                // Gap-fill only; the primary source always wins.
                if let Some(slot) = inner.slots.get_mut(&Provider::Codex) {
                    if let Some(snapshot) = slot.snapshot.as_mut() {
                        merge_dashboard_into_snapshot(snapshot, &dashboard);
                    }
                }
                drop(inner);
                self.notify_changed();
            }
            Err(e) => {
                tracing::debug!(error = %e, "dashboard fetch failed");
                if e.needs_reauth() || matches!(e, MeterError::CookieImport(_)) {
                    self.inner.write().expect("store lock").dashboard_requires_login = true;
                }
                // The cached dashboard stays; it is only invalidated by an
                // identity change.
            }
        }
    }

    // =========================================================================
    // Enable / Disable
    // =========================================================================

    /// Enable or disable a provider. Disabling synchronously clears every
    /// trace of it: snapshot, error, token data, gate state, attempt
    /// history, and cache entries. A disabled provider never shows stale
    /// data.
    pub fn set_provider_enabled(&self, provider: Provider, enabled: bool) {
        {
            let mut inner = self.inner.write().expect("store lock");
            let Some(slot) = inner.slots.get_mut(&provider) else {
                return;
            };
            slot.enabled = enabled;

            if !enabled {
                slot.snapshot = None;
                slot.error = None;
                slot.hint = None;
                slot.source = None;
                slot.status = None;
                slot.token_cost = None;
                slot.attempts.clear();
                slot.gate.reset();
                slot.last_primary_remaining = None;
                inner.token_last_refresh.remove(&provider);

                if provider.supports_credits() {
                    inner.credits = None;
                }
                if provider == Provider::Codex {
                    inner.dashboard = None;
                    inner.dashboard_requires_login = false;
                    inner.last_dashboard_email = None;
                }
            }
        }

        if !enabled {
            self.ctx.set_expected_email(provider, None);
            if let Some(cache) = &self.cache {
                cache.remove(provider);
            }
        }
        self.notify_changed();
    }

    // =========================================================================
    // Startup Pre-Population
    // =========================================================================

    /// Pre-populate empty slots from the snapshot cache. Cached entries are
    /// never authoritative; the next live fetch replaces them.
    pub fn load_cached(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        let mut loaded = false;
        {
            let mut inner = self.inner.write().expect("store lock");
            for provider in Provider::ALL {
                let Some(slot) = inner.slots.get_mut(provider) else {
                    continue;
                };
                if !slot.enabled || slot.snapshot.is_some() {
                    continue;
                }
                if let Some((cached, _)) = cache.read_any(*provider) {
                    slot.snapshot = Some(cached.snapshot);
                    slot.source = Some(format!("cache:{}", cached.source));
                    loaded = true;
                }
            }
        }
        if loaded {
            self.notify_changed();
        }
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Replace the orchestration settings. An in-flight refresh keeps the
    /// old values; the next cycle picks these up.
    pub fn update_settings(&self, settings: StoreSettings) {
        *self.settings.write().expect("settings lock") = settings;
    }

    /// Current base refresh interval.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.settings.read().expect("settings lock").refresh_interval
    }

    // =========================================================================
    // Read-Only Queries
    // =========================================================================

    /// Latest snapshot for a provider, cached or live.
    #[must_use]
    pub fn snapshot(&self, provider: Provider) -> Option<UsageSnapshot> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.snapshot.clone()
    }

    /// Gate-surfaced error text, if any.
    #[must_use]
    pub fn error(&self, provider: Provider) -> Option<String> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.error.clone()
    }

    /// Remediation hint accompanying a surfaced error.
    #[must_use]
    pub fn error_hint(&self, provider: Provider) -> Option<String> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.hint.clone()
    }

    /// Whether the provider is in the surfaced-error ("stale") state. A
    /// cached snapshot may still be shown alongside; fresh numbers win
    /// display priority over the error.
    #[must_use]
    pub fn is_stale(&self, provider: Provider) -> bool {
        let inner = self.inner.read().expect("store lock");
        inner
            .slots
            .get(&provider)
            .is_some_and(|slot| slot.enabled && slot.error.is_some())
    }

    /// Source label of the last successful fetch.
    #[must_use]
    pub fn source(&self, provider: Provider) -> Option<String> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.source.clone()
    }

    /// Latest status-page payload.
    #[must_use]
    pub fn status(&self, provider: Provider) -> Option<StatusPayload> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.status.clone()
    }

    /// Latest token/cost snapshot.
    #[must_use]
    pub fn token_cost(&self, provider: Provider) -> Option<TokenCostSnapshot> {
        let inner = self.inner.read().expect("store lock");
        inner.slots.get(&provider)?.token_cost.clone()
    }

    /// Latest credits snapshot, cached across failures.
    #[must_use]
    pub fn credits(&self) -> Option<CreditsSnapshot> {
        self.inner.read().expect("store lock").credits.clone()
    }

    /// Latest reconciled dashboard snapshot.
    #[must_use]
    pub fn dashboard(&self) -> Option<OpenAIDashboardSnapshot> {
        self.inner.read().expect("store lock").dashboard.clone()
    }

    /// Whether the dashboard session needs a fresh login.
    #[must_use]
    pub fn dashboard_requires_login(&self) -> bool {
        self.inner.read().expect("store lock").dashboard_requires_login
    }

    /// Providers currently enabled, in display order.
    #[must_use]
    pub fn enabled_providers(&self) -> Vec<Provider> {
        let inner = self.inner.read().expect("store lock");
        Provider::ALL
            .iter()
            .filter(|p| inner.slots.get(p).is_some_and(|slot| slot.enabled))
            .copied()
            .collect()
    }

    /// Recent fetch attempts for a provider (bounded audit trail).
    #[must_use]
    pub fn attempts(&self, provider: Provider) -> Vec<ProviderFetchAttempt> {
        let inner = self.inner.read().expect("store lock");
        inner
            .slots
            .get(&provider)
            .map(|slot| slot.attempts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Change-notification channel: the value bumps after every state
    /// change worth re-rendering.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    /// Take the one-shot event receiver. Yields `None` after the first call.
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<UsageEvent>> {
        self.events_rx.lock().expect("events lock").take()
    }

    fn notify_changed(&self) {
        self.changed_tx.send_modify(|v| *v = v.wrapping_add(1));
    }
}
