//! Integration tests for the refresh orchestrator.
//!
//! Exercises the store against scripted probes: gate hysteresis, disabled
//! providers, refresh idempotence, depletion events, token-cost cadence,
//! dashboard reconciliation, and cache pre-population.

mod common;

use std::sync::Arc;
use std::time::Duration;

use meterbar::core::fetch_plan::{FetchKind, FetchPlan, FetchStrategy};
use meterbar::core::models::RateWindow;
use meterbar::core::provider::Provider;
use meterbar::core::store::UsageEvent;
use meterbar::probes::claude::ClaudePtyProbe;
use meterbar::probes::testing::{ScriptedProbe, ScriptedResult, snapshot};
use meterbar::storage::cache::SnapshotCache;

use common::{
    DashOutcome, ScriptedCredits, ScriptedDashboard, SlowProbe, StoreBuilder,
    context_with_pty, context_with_session, dashboard_signed_in, plan_of, snapshot_with_email,
};

// =============================================================================
// Basic Refresh
// =============================================================================

#[tokio::test]
async fn refresh_populates_snapshot_and_source() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::succeeding(Provider::Claude, RateWindow::from_remaining(42.0)),
    );
    let store = builder.build();

    assert!(store.refresh(false).await);

    let snapshot = store.snapshot(Provider::Claude).expect("snapshot");
    let primary = snapshot.primary.expect("primary");
    assert!((primary.remaining_percent - 42.0).abs() < f64::EPSILON);
    assert_eq!(store.source(Provider::Claude).as_deref(), Some("api"));
    assert!(store.error(Provider::Claude).is_none());
    assert!(!store.is_stale(Provider::Claude));

    // The audit trail recorded the attempt.
    let attempts = store.attempts(Provider::Claude);
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
}

#[tokio::test]
async fn refresh_notifies_watchers() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::succeeding(Provider::Claude, RateWindow::from_remaining(42.0)),
    );
    let store = builder.build();

    let mut watcher = store.subscribe();
    let before = *watcher.borrow_and_update();
    store.refresh(false).await;
    assert!(watcher.has_changed().unwrap());
    assert_ne!(*watcher.borrow_and_update(), before);
}

// =============================================================================
// Failure Gate
// =============================================================================

#[tokio::test]
async fn single_flake_keeps_last_good_numbers_without_error() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::with_script(
            Provider::Claude,
            vec![ScriptedResult::Success(snapshot(RateWindow::from_remaining(
                42.0,
            )))],
            ScriptedResult::Timeout,
        ),
    );
    let store = builder.build();

    store.refresh(false).await;
    store.refresh(false).await; // first failure: suppressed

    let snapshot = store.snapshot(Provider::Claude).expect("snapshot kept");
    assert!(
        (snapshot.primary.unwrap().remaining_percent - 42.0).abs() < f64::EPSILON,
        "last-good numbers stay visible"
    );
    assert!(store.error(Provider::Claude).is_none());
    assert!(!store.is_stale(Provider::Claude));

    store.refresh(false).await; // second consecutive failure: surfaced

    assert!(store.error(Provider::Claude).is_some());
    assert!(store.is_stale(Provider::Claude));
    // Fresh numbers still win display priority; the snapshot survives.
    assert!(store.snapshot(Provider::Claude).is_some());
}

#[tokio::test]
async fn failure_without_prior_success_surfaces_immediately() {
    let builder = StoreBuilder::new(&[Provider::Claude])
        .with_probe(Provider::Claude, ScriptedProbe::failing(Provider::Claude));
    let store = builder.build();

    store.refresh(false).await;

    assert!(store.error(Provider::Claude).is_some());
    assert!(store.snapshot(Provider::Claude).is_none());
}

#[tokio::test]
async fn tool_not_installed_bypasses_the_grace() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::with_script(
            Provider::Claude,
            vec![
                ScriptedResult::Success(snapshot(RateWindow::from_remaining(42.0))),
                ScriptedResult::ToolNotInstalled,
            ],
            ScriptedResult::ToolNotInstalled,
        ),
    );
    let store = builder.build();

    store.refresh(false).await;
    store.refresh(false).await; // not-installed isn't transient: no grace

    assert!(store.error(Provider::Claude).is_some());
    let hint = store.error_hint(Provider::Claude).expect("hint");
    assert!(hint.contains("Install"));
}

#[tokio::test]
async fn success_after_flake_clears_the_streak() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::with_script(
            Provider::Claude,
            vec![
                ScriptedResult::Success(snapshot(RateWindow::from_remaining(42.0))),
                ScriptedResult::Timeout,
                ScriptedResult::Success(snapshot(RateWindow::from_remaining(40.0))),
                ScriptedResult::Timeout,
            ],
            ScriptedResult::Timeout,
        ),
    );
    let store = builder.build();

    for _ in 0..4 {
        store.refresh(false).await;
    }

    // The 4th call is again a *first* failure after a success: suppressed.
    assert!(store.error(Provider::Claude).is_none());
    assert!(!store.is_stale(Provider::Claude));
}

// =============================================================================
// Disabled Providers
// =============================================================================

#[tokio::test]
async fn disabling_a_provider_clears_all_state() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::succeeding(Provider::Claude, RateWindow::from_remaining(42.0)),
    );
    let store = builder.build();

    store.refresh(false).await;
    assert!(store.snapshot(Provider::Claude).is_some());
    assert!(store.token_cost(Provider::Claude).is_some());

    store.set_provider_enabled(Provider::Claude, false);

    assert!(store.snapshot(Provider::Claude).is_none());
    assert!(store.error(Provider::Claude).is_none());
    assert!(store.token_cost(Provider::Claude).is_none());
    assert!(store.attempts(Provider::Claude).is_empty());
    assert!(!store.is_stale(Provider::Claude));
    assert!(store.enabled_providers().is_empty());
}

#[tokio::test]
async fn disabled_provider_is_not_fetched() {
    let probe = ScriptedProbe::succeeding(Provider::Claude, RateWindow::from_remaining(42.0));
    let builder = StoreBuilder::new(&[]).with_probe(Provider::Claude, probe);
    let store = builder.build();

    store.refresh(false).await;

    assert!(store.snapshot(Provider::Claude).is_none());
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn overlapping_refresh_calls_short_circuit() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_plan(plan_of(
        Provider::Claude,
        Arc::new(SlowProbe::new(Provider::Claude, Duration::from_millis(300))),
    ));
    let store = Arc::new(builder.build());

    let first = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.refresh(false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.is_refreshing());

    // A second call while the first is in flight is a no-op.
    let second = store.refresh(false).await;
    assert!(!second);

    assert!(first.await.unwrap());
    assert_eq!(store.fan_out_count(), 1, "only one fan-out started");

    // Once idle, refresh works again.
    assert!(store.refresh(false).await);
    assert_eq!(store.fan_out_count(), 2);
}

// =============================================================================
// Depletion Events
// =============================================================================

#[tokio::test]
async fn depletion_event_fires_exactly_at_the_edge() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::with_script(
            Provider::Claude,
            vec![
                ScriptedResult::Success(snapshot(RateWindow::from_remaining(5.0))),
                ScriptedResult::Success(snapshot(RateWindow::from_remaining(0.0))),
            ],
            ScriptedResult::Success(snapshot(RateWindow::from_remaining(0.0))),
        ),
    );
    let store = builder.build();
    let mut events = store.take_events().expect("events receiver");

    store.refresh(false).await; // 5% remaining: no event
    store.refresh(false).await; // crossed to 0: edge
    store.refresh(false).await; // still 0: no repeat

    assert_eq!(
        events.try_recv().ok(),
        Some(UsageEvent::SessionDepleted {
            provider: Provider::Claude
        })
    );
    assert!(events.try_recv().is_err(), "no repeat while depleted");
}

// =============================================================================
// Token / Cost Cadence
// =============================================================================

#[tokio::test]
async fn token_refresh_is_ttl_gated_with_force_override() {
    let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
        Provider::Claude,
        ScriptedProbe::succeeding(Provider::Claude, RateWindow::from_remaining(42.0)),
    );
    let token_source = Arc::clone(&builder.token_source);
    let store = builder.build();

    store.refresh(false).await;
    assert_eq!(token_source.calls(), 1);
    assert_eq!(
        store
            .token_cost(Provider::Claude)
            .and_then(|t| t.session_tokens),
        Some(1234)
    );

    // Within the TTL nothing runs again.
    store.refresh(false).await;
    assert_eq!(token_source.calls(), 1);

    // Manual refresh forces through the TTL.
    store.refresh(true).await;
    assert_eq!(token_source.calls(), 2);
}

#[tokio::test]
async fn providers_without_token_support_are_skipped() {
    let builder = StoreBuilder::new(&[Provider::Zai]).with_probe(
        Provider::Zai,
        ScriptedProbe::succeeding(Provider::Zai, RateWindow::from_remaining(42.0)),
    );
    let token_source = Arc::clone(&builder.token_source);
    let store = builder.build();

    store.refresh(true).await;
    assert_eq!(token_source.calls(), 0);
    assert!(store.token_cost(Provider::Zai).is_none());
}

// =============================================================================
// Credits
// =============================================================================

#[tokio::test]
async fn credits_are_cached_across_failures() {
    let builder = StoreBuilder::new(&[Provider::Codex]).with_probe(
        Provider::Codex,
        ScriptedProbe::succeeding(Provider::Codex, RateWindow::from_remaining(42.0)),
    );
    let store = builder
        .build()
        .with_credits_probe(Arc::new(ScriptedCredits::with_script(
            vec![Some(10.0)],
            None,
        )));

    store.refresh(false).await;
    assert!((store.credits().expect("credits").remaining - 10.0).abs() < f64::EPSILON);

    // The next fetch fails; the cached balance survives.
    store.refresh(false).await;
    assert!((store.credits().expect("credits").remaining - 10.0).abs() < f64::EPSILON);
}

// =============================================================================
// Dashboard Reconciliation
// =============================================================================

#[tokio::test]
async fn matching_dashboard_merges_gaps_into_codex() {
    let dashboard = Arc::new(ScriptedDashboard::always(DashOutcome::Snapshot(
        dashboard_signed_in("a@x.com"),
    )));
    let builder = StoreBuilder::new(&[Provider::Codex])
        .with_ctx(context_with_session("a@x.com"))
        .with_dashboard(Arc::clone(&dashboard))
        .with_probe(
            Provider::Codex,
            ScriptedProbe::with_script(
                Provider::Codex,
                vec![],
                ScriptedResult::Success(snapshot_with_email(42.0, "a@x.com")),
            ),
        );
    let store = builder.build();

    store.refresh(false).await;

    assert!(store.dashboard().is_some());
    assert!(!store.dashboard_requires_login());

    let merged = store.snapshot(Provider::Codex).expect("snapshot");
    // The primary came from the API probe and stays untouched.
    assert!((merged.primary.unwrap().remaining_percent - 42.0).abs() < f64::EPSILON);
    // The weekly window and credits were gaps the dashboard filled.
    assert!((merged.secondary.expect("merged secondary").remaining_percent - 80.0).abs()
        < f64::EPSILON);
    assert!((merged.credits.expect("merged credits").remaining - 12.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn mismatched_dashboard_account_never_merges() {
    let dashboard = Arc::new(ScriptedDashboard::always(DashOutcome::Snapshot(
        dashboard_signed_in("b@x.com"),
    )));
    let builder = StoreBuilder::new(&[Provider::Codex])
        .with_ctx(context_with_session("b@x.com"))
        .with_dashboard(Arc::clone(&dashboard))
        .with_probe(
            Provider::Codex,
            ScriptedProbe::with_script(
                Provider::Codex,
                vec![],
                ScriptedResult::Success(snapshot_with_email(42.0, "a@x.com")),
            ),
        );
    let store = builder.build();

    store.refresh(false).await;

    // Wrong-account data is rejected outright.
    assert!(store.dashboard().is_none());
    assert!(store.dashboard_requires_login());

    let unmerged = store.snapshot(Provider::Codex).expect("snapshot");
    assert!(unmerged.secondary.is_none());
    assert!(unmerged.credits.is_none());
}

#[tokio::test]
async fn rejected_session_gets_exactly_one_reimport_retry() {
    let dashboard = Arc::new(ScriptedDashboard::with_script(
        vec![DashOutcome::LoginRequired],
        DashOutcome::Snapshot(dashboard_signed_in("a@x.com")),
    ));
    let builder = StoreBuilder::new(&[Provider::Codex])
        .with_ctx(context_with_session("a@x.com"))
        .with_dashboard(Arc::clone(&dashboard))
        .with_probe(
            Provider::Codex,
            ScriptedProbe::with_script(
                Provider::Codex,
                vec![],
                ScriptedResult::Success(snapshot_with_email(42.0, "a@x.com")),
            ),
        );
    let store = builder.build();

    store.refresh(false).await;

    assert_eq!(dashboard.calls(), 2, "one retry after the rejected session");
    assert!(store.dashboard().is_some());
    assert!(!store.dashboard_requires_login());
}

#[tokio::test]
async fn dashboard_refresh_is_rate_limited_between_cycles() {
    let dashboard = Arc::new(ScriptedDashboard::always(DashOutcome::Snapshot(
        dashboard_signed_in("a@x.com"),
    )));
    let builder = StoreBuilder::new(&[Provider::Codex])
        .with_ctx(context_with_session("a@x.com"))
        .with_dashboard(Arc::clone(&dashboard))
        .with_probe(
            Provider::Codex,
            ScriptedProbe::with_script(
                Provider::Codex,
                vec![],
                ScriptedResult::Success(snapshot_with_email(42.0, "a@x.com")),
            ),
        );
    let store = builder.build();

    store.refresh(false).await;
    store.refresh(false).await;

    // The base interval is minutes; a back-to-back cycle stays throttled.
    assert_eq!(dashboard.calls(), 1);

    // Explicit force bypasses the limiter.
    store.refresh_dashboard(true).await;
    assert_eq!(dashboard.calls(), 2);
}

// =============================================================================
// End-to-End PTY Scenario
// =============================================================================

#[tokio::test]
async fn pty_transcript_flows_into_published_state() {
    let transcript = "\
\u{1b}[2J\u{1b}[1;33mCurrent session\u{1b}[0m
some filler
42% left

Current week (all models)
15% used
"
    .to_string();

    let plan = FetchPlan::new(
        Provider::Claude,
        vec![FetchStrategy {
            id: "claude-cli-pty",
            kind: FetchKind::CliPty,
            probe: Arc::new(ClaudePtyProbe),
            is_available: |ctx| ctx.locator.resolve("claude").is_some(),
            should_fallback: |_| false,
        }],
    );

    let builder = StoreBuilder::new(&[Provider::Claude])
        .with_ctx(context_with_pty("claude", vec![transcript]))
        .with_plan(plan);
    let store = builder.build();

    store.refresh(false).await;

    let snapshot = store.snapshot(Provider::Claude).expect("snapshot");
    let primary = snapshot.primary.expect("primary");
    assert!((primary.remaining_percent - 42.0).abs() < f64::EPSILON);
    let secondary = snapshot.secondary.expect("secondary");
    assert!((secondary.remaining_percent - 85.0).abs() < f64::EPSILON);
    assert_eq!(store.source(Provider::Claude).as_deref(), Some("cli-pty"));
}

// =============================================================================
// Cache Pre-Population
// =============================================================================

#[tokio::test]
async fn cache_prepopulates_a_fresh_store() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().to_path_buf();

    {
        let builder = StoreBuilder::new(&[Provider::Claude]).with_probe(
            Provider::Claude,
            ScriptedProbe::with_script(
                Provider::Claude,
                vec![],
                ScriptedResult::Success(snapshot_with_email(42.0, "a@x.com")),
            ),
        );
        let store = builder
            .build()
            .with_cache(SnapshotCache::in_dir(cache_dir.clone()));
        store.refresh(false).await;
    }

    // A brand-new store sees the cached numbers before any live probe.
    let builder = StoreBuilder::new(&[Provider::Claude])
        .with_probe(Provider::Claude, ScriptedProbe::failing(Provider::Claude));
    let store = builder
        .build()
        .with_cache(SnapshotCache::in_dir(cache_dir));
    store.load_cached();

    let snapshot = store.snapshot(Provider::Claude).expect("cached snapshot");
    assert!((snapshot.primary.unwrap().remaining_percent - 42.0).abs() < f64::EPSILON);
    assert_eq!(store.source(Provider::Claude).as_deref(), Some("cache:api"));
}
