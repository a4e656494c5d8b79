//! Browser cookie import.
//!
//! Web probes authenticate with session cookies imported from the user's
//! browsers. The OS cookie databases themselves are opaque collaborators:
//! each is wrapped in a [`BrowserCookieStore`] implementation supplied by
//! the host app, tried in priority order. Every import is attributable to a
//! named source for diagnostics, and failed imports classify into distinct
//! remediation hints.

pub mod reconcile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::core::models::normalize_email;
use crate::error::CookieImportError;

/// Minimum interval between import attempts per target email. Explicit
/// force bypasses it.
pub const DEFAULT_IMPORT_MIN_INTERVAL: Duration = Duration::from_secs(300);

/// One browser cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl Cookie {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
        }
    }
}

/// Consumed capability: one browser's cookie store.
pub trait BrowserCookieStore: Send + Sync {
    /// Human-readable source name ("Safari", "Chrome", ...).
    fn source_name(&self) -> &str;

    /// Read cookies for a domain.
    ///
    /// # Errors
    ///
    /// `BrowserAccessDenied` when the OS refuses access to the store.
    fn read_cookies(&self, domain: &str) -> Result<Vec<Cookie>, CookieImportError>;

    /// Identify the signed-in account from a cookie set, if the store's
    /// session format exposes one.
    fn signed_in_email(&self, cookies: &[Cookie]) -> Option<String>;
}

/// A successful cookie import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieImport {
    /// Raw `Cookie:` header value.
    pub header: String,
    /// Which store supplied it ("Safari", "Chrome", "manual").
    pub source: String,
    /// The signed-in account the session belongs to, when known.
    pub signed_in_email: Option<String>,
    pub imported_at: DateTime<Utc>,
}

/// Capability consumed by web probes: obtain a cookie header for a domain.
pub trait CookieHeaderSource: Send + Sync {
    /// Import a session cookie header for `domain`.
    ///
    /// When `expected_email` is given, only a session signed in as that
    /// account (normalized comparison) is acceptable; other discovered
    /// accounts are collected into `NoMatchingAccount` for diagnostics.
    ///
    /// # Errors
    ///
    /// A classified [`CookieImportError`].
    fn cookie_header(
        &self,
        domain: &str,
        expected_email: Option<&str>,
        force: bool,
    ) -> Result<CookieImport, CookieImportError>;
}

#[derive(Debug, Clone)]
struct ImportMemo {
    at: Instant,
    result: Result<CookieImport, CookieImportError>,
}

/// Imports session cookies from configured browser stores, with per-email
/// attempt throttling and a manually configured header override.
pub struct CookieImporter {
    stores: Vec<Arc<dyn BrowserCookieStore>>,
    manual_header: RwLock<Option<String>>,
    min_interval: Duration,
    memos: Mutex<HashMap<String, ImportMemo>>,
}

impl CookieImporter {
    /// Build an importer over browser stores in priority order.
    #[must_use]
    pub fn new(stores: Vec<Arc<dyn BrowserCookieStore>>) -> Self {
        Self {
            stores,
            manual_header: RwLock::new(None),
            min_interval: DEFAULT_IMPORT_MIN_INTERVAL,
            memos: Mutex::new(HashMap::new()),
        }
    }

    /// Override the throttle interval.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set or clear the manually configured `Cookie:` header. A manual
    /// header takes priority over every browser store.
    pub fn set_manual_header(&self, header: Option<String>) {
        *self.manual_header.write().expect("manual header lock") = header;
    }

    fn import_uncached(
        &self,
        domain: &str,
        expected_email: Option<&str>,
    ) -> Result<CookieImport, CookieImportError> {
        if let Some(header) = self.manual_header.read().expect("manual header lock").clone() {
            return manual_import(&header);
        }

        let expected = expected_email.map(normalize_email);
        let mut found_accounts = Vec::new();
        let mut denied_browser: Option<String> = None;
        let mut any_readable = false;

        for store in &self.stores {
            let cookies = match store.read_cookies(domain) {
                Ok(cookies) => {
                    any_readable = true;
                    cookies
                }
                Err(CookieImportError::BrowserAccessDenied { browser }) => {
                    tracing::debug!(browser, "cookie store access denied");
                    denied_browser.get_or_insert(browser);
                    continue;
                }
                Err(e) => {
                    tracing::debug!(source = store.source_name(), error = %e, "cookie read failed");
                    continue;
                }
            };
            if cookies.is_empty() {
                continue;
            }

            let email = store.signed_in_email(&cookies);
            if let (Some(expected), Some(actual)) = (expected.as_deref(), email.as_deref()) {
                if normalize_email(actual) != expected {
                    found_accounts.push(actual.to_string());
                    continue;
                }
            }

            tracing::info!(
                source = store.source_name(),
                email = ?email,
                "imported session cookies"
            );
            return Ok(CookieImport {
                header: header_from_cookies(&cookies),
                source: store.source_name().to_string(),
                signed_in_email: email,
                imported_at: Utc::now(),
            });
        }

        if !found_accounts.is_empty() {
            return Err(CookieImportError::NoMatchingAccount { found_accounts });
        }
        if let Some(browser) = denied_browser {
            if !any_readable {
                return Err(CookieImportError::BrowserAccessDenied { browser });
            }
        }
        Err(CookieImportError::NoCookiesFound)
    }
}

impl CookieHeaderSource for CookieImporter {
    fn cookie_header(
        &self,
        domain: &str,
        expected_email: Option<&str>,
        force: bool,
    ) -> Result<CookieImport, CookieImportError> {
        let key = expected_email.map_or_else(|| "*".to_string(), normalize_email);

        if !force {
            let memos = self.memos.lock().expect("memo lock");
            if let Some(memo) = memos.get(&key) {
                if memo.at.elapsed() < self.min_interval {
                    tracing::debug!(target_email = %key, "cookie import throttled, replaying last result");
                    return memo.result.clone();
                }
            }
        }

        let result = self.import_uncached(domain, expected_email);
        self.memos.lock().expect("memo lock").insert(
            key,
            ImportMemo {
                at: Instant::now(),
                result: result.clone(),
            },
        );
        result
    }
}

/// Build a `Cookie:` header value from a cookie set.
#[must_use]
pub fn header_from_cookies(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn manual_import(header: &str) -> Result<CookieImport, CookieImportError> {
    let trimmed = header.trim();
    // Minimal sanity: at least one name=value pair, single line.
    let valid = !trimmed.is_empty()
        && !trimmed.contains('\n')
        && trimmed.split(';').any(|pair| {
            let mut parts = pair.splitn(2, '=');
            matches!(
                (parts.next(), parts.next()),
                (Some(name), Some(value)) if !name.trim().is_empty() && !value.trim().is_empty()
            )
        });
    if !valid {
        return Err(CookieImportError::ManualCookieHeaderInvalid);
    }

    Ok(CookieImport {
        header: trimmed.to_string(),
        source: "manual".to_string(),
        signed_in_email: None,
        imported_at: Utc::now(),
    })
}
