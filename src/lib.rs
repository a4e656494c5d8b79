//! meterbar - usage-probing and state-reconciliation engine.
//!
//! The core of a menu-bar quota tracker for AI coding assistants: probes
//! each provider's native client (CLI over a pseudo-terminal, OAuth/API
//! endpoint, or cookie-authenticated web dashboard), normalizes the results
//! into canonical snapshots, and reconciles per-provider freshness and
//! failure state behind a single-owner store the UI layer reads.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use meterbar::cookies::CookieImporter;
//! use meterbar::core::http::{DEFAULT_TIMEOUT, build_client};
//! use meterbar::core::locate::SystemBinaryLocator;
//! use meterbar::core::pty::NativePtyRunner;
//! use meterbar::core::scheduler::RefreshScheduler;
//! use meterbar::core::status::StatusFetcher;
//! use meterbar::core::store::UsageStore;
//! use meterbar::probes::codex::{CodexCreditsProbe, OpenAIDashboardProbe};
//! use meterbar::probes::token_cost::LocalLogScanner;
//! use meterbar::probes::{ProbeContext, ProbeSettings, standard_plans};
//! use meterbar::storage::cache::SnapshotCache;
//! use meterbar::storage::config::EngineConfig;
//! use meterbar::storage::paths::AppPaths;
//!
//! # async fn wire() -> meterbar::Result<()> {
//! let paths = AppPaths::new();
//! paths.ensure_dirs()?;
//! let config = EngineConfig::load(&paths.config_file())?;
//!
//! let importer = Arc::new(CookieImporter::new(vec![]));
//! let ctx = Arc::new(ProbeContext::new(
//!     build_client(DEFAULT_TIMEOUT)?,
//!     Arc::new(NativePtyRunner),
//!     Arc::new(SystemBinaryLocator::new()),
//!     importer,
//!     ProbeSettings::default(),
//! ));
//!
//! let store = Arc::new(
//!     UsageStore::new(
//!         &config,
//!         ctx,
//!         standard_plans(),
//!         Arc::new(LocalLogScanner::new()),
//!         Arc::new(OpenAIDashboardProbe::new()),
//!     )
//!     .with_credits_probe(Arc::new(CodexCreditsProbe::new()))
//!     .with_status_fetcher(StatusFetcher::new()?)
//!     .with_cache(SnapshotCache::new(&paths)),
//! );
//!
//! store.load_cached();
//! let scheduler = RefreshScheduler::new(Arc::clone(&store));
//! scheduler.start();
//! store.refresh(false).await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cookies;
pub mod core;
pub mod error;
pub mod probes;
pub mod storage;
pub mod util;

pub use crate::core::models::{
    CreditsSnapshot, OpenAIDashboardSnapshot, ProviderIdentity, RateWindow, TokenCostSnapshot,
    UsageSnapshot,
};
pub use crate::core::provider::Provider;
pub use crate::core::store::{UsageEvent, UsageStore};
pub use crate::error::{CookieImportError, MeterError, Result};
