//! Snapshot cache.
//!
//! A small serialized cache keyed by provider + account email, written
//! after every successful refresh and read once at startup to pre-populate
//! the UI before the first live probe completes. Never authoritative; a
//! live fetch always supersedes it.
//!
//! Writes are atomic (temp file + rename) so an interrupted process cannot
//! leave a corrupt entry behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::models::UsageSnapshot;
use crate::core::provider::Provider;
use crate::error::Result;
use crate::storage::paths::AppPaths;

/// Age thresholds for cached data.
pub const STALENESS_FRESH_SECS: u64 = 300;
pub const STALENESS_STALE_SECS: u64 = 1800;
pub const STALENESS_VERY_STALE_SECS: u64 = 3600;

/// Cache staleness level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Under 5 minutes old.
    Fresh,
    /// 5-30 minutes old.
    Stale,
    /// 30-60 minutes old.
    VeryStale,
    /// Missing or too old to use.
    Missing,
}

impl Staleness {
    /// Whether the data is still worth pre-populating with.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// Classify an age in seconds.
    #[must_use]
    pub const fn from_age_secs(age_secs: u64) -> Self {
        if age_secs < STALENESS_FRESH_SECS {
            Self::Fresh
        } else if age_secs < STALENESS_STALE_SECS {
            Self::Stale
        } else if age_secs < STALENESS_VERY_STALE_SECS {
            Self::VeryStale
        } else {
            Self::Missing
        }
    }
}

/// One cached provider entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedUsage {
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,
    pub source: String,
    pub snapshot: UsageSnapshot,
}

/// Filesystem-backed snapshot cache.
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    /// Cache under the app's standard cache directory.
    #[must_use]
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            dir: paths.usage_cache_dir(),
        }
    }

    /// Cache under a custom directory. Used by tests.
    #[must_use]
    pub fn in_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, provider: Provider, account_email: Option<&str>) -> PathBuf {
        let account = account_email.map_or_else(|| "default".to_string(), sanitize_key);
        self.dir.join(format!("{}-{account}.json", provider.id()))
    }

    /// Write an entry atomically.
    ///
    /// # Errors
    ///
    /// Propagates I/O and serialization failures.
    pub fn write(&self, entry: &CachedUsage) -> Result<()> {
        let path = self.entry_path(entry.provider, entry.account_email.as_deref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(entry)?;
        write_atomic(&path, content.as_bytes())?;
        Ok(())
    }

    /// Read an entry with its staleness, if present and usable.
    ///
    /// # Errors
    ///
    /// Propagates read and parse failures for existing entries.
    pub fn read(
        &self,
        provider: Provider,
        account_email: Option<&str>,
    ) -> Result<Option<(CachedUsage, Staleness)>> {
        let path = self.entry_path(provider, account_email);
        let staleness = staleness_of(&path);
        if !staleness.is_usable() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let entry: CachedUsage = serde_json::from_str(&content)?;
        Ok(Some((entry, staleness)))
    }

    /// Read the most recent usable entry for a provider, any account.
    #[must_use]
    pub fn read_any(&self, provider: Provider) -> Option<(CachedUsage, Staleness)> {
        let prefix = format!("{}-", provider.id());
        let entries = std::fs::read_dir(&self.dir).ok()?;

        let mut best: Option<(CachedUsage, Staleness, SystemTime)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let staleness = staleness_of(&path);
            if !staleness.is_usable() {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(cached) = serde_json::from_str::<CachedUsage>(&content) else {
                continue;
            };
            let modified = path
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().is_none_or(|(_, _, at)| modified > *at) {
                best = Some((cached, staleness, modified));
            }
        }

        best.map(|(cached, staleness, _)| (cached, staleness))
    }

    /// Drop a provider's entries, all accounts. Used when the provider is
    /// disabled.
    pub fn remove(&self, provider: Provider) {
        let prefix = format!("{}-", provider.id());
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix));
            if matches {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

fn staleness_of(path: &Path) -> Staleness {
    let age = path
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|d| d.as_secs());
    age.map_or(Staleness::Missing, Staleness::from_age_secs)
}

/// Reduce an account email to a safe filename component.
fn sanitize_key(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("cache"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}
