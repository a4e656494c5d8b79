//! Scripted probe collaborators for tests.
//!
//! Probes are pure functions over the capabilities in [`ProbeContext`], so
//! tests substitute scripted PTY runners, locators, and cookie sources
//! instead of touching real terminals or browsers.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{ProbeContext, ProbeSettings, UsageProbe};
use crate::cookies::{CookieHeaderSource, CookieImport};
use crate::core::http::build_client;
use crate::core::locate::BinaryLocator;
use crate::core::models::{RateWindow, UsageSnapshot};
use crate::core::provider::Provider;
use crate::core::pty::{PtyCapture, PtyCommandRunner, PtyRequest};
use crate::error::{CookieImportError, MeterError, Result};

// =============================================================================
// Scripted PTY
// =============================================================================

/// PTY runner replaying scripted transcripts. `Err(())` entries time out.
pub struct ScriptedPty {
    script: Mutex<VecDeque<std::result::Result<String, ()>>>,
    requests: Mutex<Vec<PtyRequest>>,
}

impl ScriptedPty {
    /// Every call succeeds with the next transcript.
    #[must_use]
    pub fn with_transcripts(transcripts: Vec<String>) -> Self {
        Self::with_script(transcripts.into_iter().map(Ok).collect())
    }

    /// Full control over per-call outcomes.
    #[must_use]
    pub fn with_script(script: Vec<std::result::Result<String, ()>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// How many times `run` was called.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    /// The requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<PtyRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl PtyCommandRunner for ScriptedPty {
    async fn run(&self, request: PtyRequest) -> Result<PtyCapture> {
        let timeout_err = MeterError::TimedOut {
            provider: request.binary.display().to_string(),
            seconds: request.timeout.as_secs(),
        };
        self.requests.lock().expect("requests lock").push(request);

        match self.script.lock().expect("script lock").pop_front() {
            Some(Ok(text)) => Ok(PtyCapture { text }),
            Some(Err(())) | None => Err(timeout_err),
        }
    }
}

// =============================================================================
// Scripted Probe
// =============================================================================

/// One scripted probe outcome.
#[derive(Debug, Clone)]
pub enum ScriptedResult {
    Success(UsageSnapshot),
    Timeout,
    ParseFailed,
    ToolNotInstalled,
    LoginRequired,
    AccountMismatch { expected: String, actual: String },
    NoDashboardData,
}

impl ScriptedResult {
    fn materialize(&self, provider: Provider) -> Result<UsageSnapshot> {
        match self {
            Self::Success(snapshot) => Ok(snapshot.clone()),
            Self::Timeout => Err(MeterError::TimedOut {
                provider: provider.id().to_string(),
                seconds: provider.default_timeout().as_secs(),
            }),
            Self::ParseFailed => Err(MeterError::ParseFailed {
                provider: provider.id().to_string(),
                reason: "scripted parse failure".to_string(),
            }),
            Self::ToolNotInstalled => Err(MeterError::ToolNotInstalled {
                tool: provider.id().to_string(),
            }),
            Self::LoginRequired => Err(MeterError::LoginRequired {
                provider: provider.id().to_string(),
            }),
            Self::AccountMismatch { expected, actual } => Err(MeterError::AccountMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            }),
            Self::NoDashboardData => Err(MeterError::NoDashboardData {
                provider: provider.id().to_string(),
            }),
        }
    }
}

/// Probe replaying a script, then a fallback outcome forever. Counts calls.
pub struct ScriptedProbe {
    provider: Provider,
    script: Mutex<VecDeque<ScriptedResult>>,
    fallback: ScriptedResult,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// Always succeeds with a snapshot built from `primary`.
    #[must_use]
    pub fn succeeding(provider: Provider, primary: RateWindow) -> Self {
        Self::with_script(provider, vec![], ScriptedResult::Success(snapshot(primary)))
    }

    /// Always times out.
    #[must_use]
    pub fn failing(provider: Provider) -> Self {
        Self::with_script(provider, vec![], ScriptedResult::Timeout)
    }

    /// Replay `script`, then `fallback` forever.
    #[must_use]
    pub fn with_script(
        provider: Provider,
        script: Vec<ScriptedResult>,
        fallback: ScriptedResult,
    ) -> Self {
        Self {
            provider,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    /// How many times `fetch` was called.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageProbe for ScriptedProbe {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, _ctx: &ProbeContext) -> Result<UsageSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.materialize(self.provider)
    }
}

/// Snapshot with only a primary window, stamped now.
#[must_use]
pub fn snapshot(primary: RateWindow) -> UsageSnapshot {
    let mut snap = UsageSnapshot::new(primary);
    snap.updated_at = Utc::now();
    snap
}

// =============================================================================
// Locators and Cookie Sources
// =============================================================================

/// Locator resolving only a fixed tool set.
pub struct StaticLocator {
    tools: HashMap<String, PathBuf>,
}

impl StaticLocator {
    #[must_use]
    pub fn resolving(tools: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|t| ((*t).to_string(), PathBuf::from(format!("/usr/local/bin/{t}"))))
                .collect(),
        }
    }
}

impl BinaryLocator for StaticLocator {
    fn resolve(&self, tool: &str) -> Option<PathBuf> {
        self.tools.get(tool).cloned()
    }
}

/// Locator resolving a single tool, as an `Arc` for context wiring.
#[must_use]
pub fn static_locator(tool: &str) -> Arc<dyn BinaryLocator> {
    Arc::new(StaticLocator::resolving(&[tool]))
}

/// Cookie source with nothing to offer.
pub struct NullCookieSource;

impl CookieHeaderSource for NullCookieSource {
    fn cookie_header(
        &self,
        _domain: &str,
        _expected_email: Option<&str>,
        _force: bool,
    ) -> std::result::Result<CookieImport, CookieImportError> {
        Err(CookieImportError::NoCookiesFound)
    }
}

/// Cookie source returning one fixed import.
pub struct StaticCookieSource {
    import: CookieImport,
}

impl StaticCookieSource {
    #[must_use]
    pub fn new(header: &str, source: &str, signed_in_email: Option<&str>) -> Self {
        Self {
            import: CookieImport {
                header: header.to_string(),
                source: source.to_string(),
                signed_in_email: signed_in_email.map(String::from),
                imported_at: Utc::now(),
            },
        }
    }
}

impl CookieHeaderSource for StaticCookieSource {
    fn cookie_header(
        &self,
        _domain: &str,
        _expected_email: Option<&str>,
        _force: bool,
    ) -> std::result::Result<CookieImport, CookieImportError> {
        Ok(self.import.clone())
    }
}

// =============================================================================
// Context Builders
// =============================================================================

/// Context with inert collaborators: empty PTY script, a locator that
/// resolves nothing, no cookies.
#[must_use]
pub fn test_context() -> ProbeContext {
    test_context_with_pty(Arc::new(ScriptedPty::with_transcripts(vec![])))
}

/// Context with a specific PTY runner; other collaborators inert.
#[must_use]
pub fn test_context_with_pty(pty: Arc<dyn PtyCommandRunner>) -> ProbeContext {
    let settings = ProbeSettings {
        retry_delay: Duration::from_millis(1),
        ..ProbeSettings::default()
    };
    ProbeContext::new(
        build_client(Duration::from_secs(5)).expect("test HTTP client"),
        pty,
        Arc::new(StaticLocator::resolving(&[])),
        Arc::new(NullCookieSource),
        settings,
    )
}
