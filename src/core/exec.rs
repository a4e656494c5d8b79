//! Plain (non-PTY) subprocess execution.
//!
//! Used by providers whose CLI exposes a machine-readable subcommand, where
//! no interactive terminal is needed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{MeterError, Result};

/// Output from a subprocess run.
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a subprocess with a hard timeout, capturing both streams.
///
/// # Errors
///
/// `ProcessSpawnFailed` when the binary cannot start, `TimedOut` on
/// deadline (the child is killed).
pub async fn run_command(
    program: &Path,
    args: &[&str],
    timeout_duration: Duration,
) -> Result<ExecOutput> {
    let program_label = program.display().to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MeterError::ProcessSpawnFailed {
            binary: program_label.clone(),
            reason: e.to_string(),
        })?;

    let result = timeout(timeout_duration, async {
        // Drain stdout and stderr concurrently; a sequential read can
        // deadlock once the child fills one pipe buffer while we wait on
        // the other.
        let stdout_handle = async {
            let mut stdout = String::new();
            if let Some(mut out) = child.stdout.take() {
                out.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(stdout)
        };
        let stderr_handle = async {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(stderr)
        };

        let (stdout_result, stderr_result) = tokio::join!(stdout_handle, stderr_handle);
        let stdout = stdout_result?;
        let stderr = stderr_result?;
        let status = child.wait().await?;

        Ok::<_, std::io::Error>(ExecOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    })
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(MeterError::ProcessSpawnFailed {
            binary: program_label,
            reason: e.to_string(),
        }),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            Err(MeterError::TimedOut {
                provider: program_label,
                seconds: timeout_duration.as_secs(),
            })
        }
    }
}

/// Run a subprocess and parse its stdout as JSON.
///
/// # Errors
///
/// Propagates `run_command` errors; `ParseFailed` on non-zero exit or
/// unparseable output.
pub async fn run_json_command<T: serde::de::DeserializeOwned>(
    program: &Path,
    args: &[&str],
    timeout_duration: Duration,
) -> Result<T> {
    let output = run_command(program, args, timeout_duration).await?;
    let program_label = program.display().to_string();

    if !output.success() {
        return Err(MeterError::ParseFailed {
            provider: program_label,
            reason: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
        });
    }

    serde_json::from_str(&output.stdout).map_err(|e| MeterError::ParseFailed {
        provider: program_label,
        reason: format!(
            "{e}: {}",
            output.stdout.chars().take(200).collect::<String>()
        ),
    })
}
