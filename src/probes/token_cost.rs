//! Token/cost scanning from local session logs.
//!
//! The slow secondary data source: walks the CLI's local JSONL session logs
//! and aggregates token counts. Deliberately kept off the fast usage
//! fan-out; the store refreshes it sequentially on a TTL-gated cadence.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::core::models::TokenCostSnapshot;
use crate::core::provider::Provider;
use crate::error::{MeterError, Result};

/// Directory recursion bound while hunting for JSONL logs.
const MAX_WALK_DEPTH: usize = 5;

/// Capability the store consumes for token/cost data.
#[async_trait]
pub trait TokenCostSource: Send + Sync {
    /// Fetch token/cost totals for a provider.
    ///
    /// # Errors
    ///
    /// `Config` for providers without a local log source; `Io`/`ParseFailed`
    /// on unreadable logs.
    async fn fetch(&self, provider: Provider) -> Result<TokenCostSnapshot>;
}

/// Scanner over the local log trees Claude Code and Codex write.
pub struct LocalLogScanner {
    claude_root: PathBuf,
    codex_root: PathBuf,
}

impl LocalLogScanner {
    /// Scanner rooted at the real `~/.claude` / `~/.codex` directories.
    #[must_use]
    pub fn new() -> Self {
        let home = directories::BaseDirs::new()
            .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
        Self {
            claude_root: home.join(".claude"),
            codex_root: home.join(".codex"),
        }
    }

    /// Scanner over custom roots. Used by tests.
    #[must_use]
    pub const fn with_roots(claude_root: PathBuf, codex_root: PathBuf) -> Self {
        Self {
            claude_root,
            codex_root,
        }
    }

    fn root_for(&self, provider: Provider) -> Result<&Path> {
        match provider {
            Provider::Claude => Ok(self.claude_root.as_path()),
            Provider::Codex => Ok(self.codex_root.as_path()),
            other => Err(MeterError::Config(format!(
                "provider {other} has no local token logs"
            ))),
        }
    }
}

impl Default for LocalLogScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCostSource for LocalLogScanner {
    async fn fetch(&self, provider: Provider) -> Result<TokenCostSnapshot> {
        let root = self.root_for(provider)?.to_path_buf();
        // Log trees can run to thousands of files; keep the walk off the
        // async runtime.
        tokio::task::spawn_blocking(move || scan_log_tree(&root))
            .await
            .map_err(|e| MeterError::Config(format!("token scan task failed: {e}")))?
    }
}

fn scan_log_tree(root: &Path) -> Result<TokenCostSnapshot> {
    if !root.exists() {
        // No logs yet is an empty account, not an error.
        return Ok(TokenCostSnapshot {
            updated_at: Utc::now(),
            ..TokenCostSnapshot::default()
        });
    }

    let mut files = Vec::new();
    collect_jsonl_files(root, 0, &mut files);

    let cutoff = (Utc::now() - Duration::days(30))
        .format("%Y-%m-%d")
        .to_string();
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let mut daily_tokens: HashMap<String, i64> = HashMap::new();
    for file in files {
        scan_jsonl_file(&file, &cutoff, &mut daily_tokens);
    }

    let month_total: i64 = daily_tokens.values().sum();
    let session_total = daily_tokens.get(&today).copied();

    Ok(TokenCostSnapshot {
        session_tokens: session_total,
        session_cost_usd: None,
        last_30_days_tokens: Some(month_total),
        last_30_days_cost_usd: None,
        updated_at: Utc::now(),
    })
}

fn collect_jsonl_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_jsonl_files(&path, depth + 1, out);
        } else if path.extension().is_some_and(|ext| ext == "jsonl") {
            out.push(path);
        }
    }
}

/// Tally tokens from one JSONL log. Lines carry usage either under
/// `message.usage` (Claude Code) or under a `token_count` event's `payload`
/// (Codex); both shapes are checked. Unparseable lines are skipped.
fn scan_jsonl_file(path: &Path, cutoff_date: &str, daily_tokens: &mut HashMap<String, i64>) {
    let Ok(file) = File::open(path) else {
        return;
    };

    for line in BufReader::new(file).lines().map_while(std::result::Result::ok) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };

        let Some(date) = value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .map(|t| t.chars().take(10).collect::<String>())
        else {
            continue;
        };
        if date.as_str() < cutoff_date {
            continue;
        }

        let usage = value
            .pointer("/message/usage")
            .or_else(|| value.pointer("/payload"));
        let Some(usage) = usage else {
            continue;
        };

        let tokens = usage
            .get("input_tokens")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
            + usage
                .get("output_tokens")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
        if tokens > 0 {
            *daily_tokens.entry(date).or_insert(0) += tokens;
        }
    }
}
