//! CLI binary resolution.
//!
//! GUI apps on macOS do not inherit the login shell's PATH, so resolving a
//! provider CLI needs more than `which` against the process environment: we
//! also capture the login-shell PATH once and check a handful of well-known
//! install directories. Probes fail fast with `ToolNotInstalled` when
//! resolution comes up empty, before attempting any spawn.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

/// Capability consumed by probes: resolve a named CLI tool to an absolute
/// path, or report it absent.
pub trait BinaryLocator: Send + Sync {
    fn resolve(&self, tool: &str) -> Option<PathBuf>;
}

/// Locator backed by the process PATH, a lazily captured login-shell PATH,
/// and well-known install directories.
#[derive(Debug, Default)]
pub struct SystemBinaryLocator {
    login_path: OnceLock<Option<String>>,
}

impl SystemBinaryLocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn login_shell_path(&self) -> Option<&str> {
        self.login_path
            .get_or_init(capture_login_shell_path)
            .as_deref()
    }
}

impl BinaryLocator for SystemBinaryLocator {
    fn resolve(&self, tool: &str) -> Option<PathBuf> {
        if let Ok(path) = which::which(tool) {
            return Some(path);
        }

        if let Some(login_path) = self.login_shell_path() {
            let cwd = std::env::current_dir().ok()?;
            if let Ok(path) = which::which_in(tool, Some(login_path), cwd) {
                tracing::debug!(tool, ?path, "resolved via login-shell PATH");
                return Some(path);
            }
        }

        for dir in well_known_dirs() {
            let candidate = dir.join(tool);
            if candidate.is_file() {
                tracing::debug!(tool, ?candidate, "resolved via well-known dir");
                return Some(candidate);
            }
        }

        None
    }
}

/// Run the user's login shell once to read the PATH it would give an
/// interactive session.
fn capture_login_shell_path() -> Option<String> {
    let shell = std::env::var("SHELL").ok()?;
    let output = Command::new(&shell)
        .args(["-lc", "printf %s \"$PATH\""])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() { None } else { Some(path) }
}

fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ];
    if let Some(base) = directories::BaseDirs::new() {
        let home = base.home_dir();
        dirs.push(home.join(".local/bin"));
        dirs.push(home.join(".npm-global/bin"));
        dirs.push(home.join("bin"));
    }
    dirs
}
