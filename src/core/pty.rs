//! Pseudo-terminal command runner.
//!
//! CLI probes drive interactive assistant CLIs through a PTY and scrape the
//! rendered text. The runner is a consumed capability behind a trait so
//! probes can be tested against scripted transcripts.
//!
//! Requirements the probes depend on:
//! - CR-terminated input submission (several CLIs only treat CR as submit in
//!   raw PTY mode).
//! - Configurable terminal dimensions; wide columns keep the tool's own
//!   line-wrapping from corrupting the layout the parser expects.
//! - A hard wall-clock timeout plus quiescence detection.
//! - Raw captured text, ANSI included; stripping is the normalizer's job.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};

use crate::error::{MeterError, Result};

/// Default terminal rows for probe sessions.
pub const DEFAULT_ROWS: u16 = 40;

/// Default terminal columns. Wide enough that usage tables render unwrapped.
pub const DEFAULT_COLS: u16 = 160;

/// How long the output must stay unchanged before capture is considered
/// quiescent.
const SETTLE_INTERVAL: Duration = Duration::from_millis(700);

/// Poll interval while watching the output buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between typed characters; interactive CLIs drop keystrokes that
/// arrive faster than their input loop polls.
const KEYSTROKE_DELAY: Duration = Duration::from_millis(20);

/// One PTY probe request.
#[derive(Debug, Clone)]
pub struct PtyRequest {
    /// Absolute path to the CLI binary.
    pub binary: PathBuf,
    /// Extra arguments passed at spawn.
    pub extra_args: Vec<String>,
    /// Input to type once the tool has drawn its prompt. Submitted with a
    /// carriage return, not a newline.
    pub send: String,
    pub rows: u16,
    pub cols: u16,
    /// Hard wall-clock timeout for the whole session.
    pub timeout: Duration,
}

impl PtyRequest {
    /// Request with default dimensions.
    #[must_use]
    pub fn new(binary: PathBuf, send: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary,
            extra_args: Vec::new(),
            send: send.into(),
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            timeout,
        }
    }
}

/// Captured PTY output, ANSI sequences included.
#[derive(Debug, Clone)]
pub struct PtyCapture {
    pub text: String,
}

/// Capability consumed by CLI probes: run a PTY-backed session and return
/// the raw transcript.
#[async_trait]
pub trait PtyCommandRunner: Send + Sync {
    /// Spawn, send input, capture until quiescence or the hard timeout.
    ///
    /// # Errors
    ///
    /// `ProcessSpawnFailed` when the PTY or child cannot be created,
    /// `TimedOut` when the deadline passes with no output at all.
    async fn run(&self, request: PtyRequest) -> Result<PtyCapture>;
}

/// Real PTY runner backed by `portable-pty`.
///
/// The blocking PTY session runs on the blocking thread pool; the async
/// caller only awaits the join handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtyRunner;

#[async_trait]
impl PtyCommandRunner for NativePtyRunner {
    async fn run(&self, request: PtyRequest) -> Result<PtyCapture> {
        let binary = request.binary.display().to_string();
        tokio::task::spawn_blocking(move || run_blocking(&request))
            .await
            .map_err(|e| MeterError::ProcessSpawnFailed {
                binary,
                reason: format!("PTY task panicked: {e}"),
            })?
    }
}

fn run_blocking(request: &PtyRequest) -> Result<PtyCapture> {
    let binary_label = request.binary.display().to_string();
    let spawn_err = |reason: String| MeterError::ProcessSpawnFailed {
        binary: binary_label.clone(),
        reason,
    };

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: request.rows,
            cols: request.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| spawn_err(format!("failed to allocate PTY: {e}")))?;

    let mut cmd = CommandBuilder::new(&request.binary);
    for arg in &request.extra_args {
        cmd.arg(arg);
    }
    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| spawn_err(e.to_string()))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| spawn_err(format!("failed to clone PTY reader: {e}")))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| spawn_err(format!("failed to take PTY writer: {e}")))?;

    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let buffer_clone = Arc::clone(&buffer);
    let reader_handle = std::thread::spawn(move || {
        let mut reader = reader;
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer_clone
                    .lock()
                    .expect("PTY buffer lock")
                    .extend_from_slice(&chunk[..n]),
            }
        }
    });

    let deadline = Instant::now() + request.timeout;

    // Give the tool a moment to draw its prompt before typing.
    wait_for_first_output(&buffer, deadline);

    for byte in request.send.bytes() {
        writer
            .write_all(&[byte])
            .map_err(|e| spawn_err(format!("failed to send input: {e}")))?;
        std::thread::sleep(KEYSTROKE_DELAY);
    }
    // Submit with CR; LF is not recognized by every CLI in raw mode.
    writer
        .write_all(b"\r")
        .map_err(|e| spawn_err(format!("failed to submit input: {e}")))?;

    // Capture until the output stops growing, or the hard deadline.
    let mut last_len = buffer.lock().expect("PTY buffer lock").len();
    let mut last_growth = Instant::now();
    loop {
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
        let len = buffer.lock().expect("PTY buffer lock").len();
        if len != last_len {
            last_len = len;
            last_growth = Instant::now();
        } else if last_growth.elapsed() >= SETTLE_INTERVAL && len > 0 {
            break;
        }
    }

    let _ = child.kill();
    drop(writer);
    drop(pair.master);
    let _ = reader_handle.join();

    let bytes = buffer.lock().expect("PTY buffer lock").clone();
    if bytes.is_empty() {
        return Err(MeterError::TimedOut {
            provider: binary_label,
            seconds: request.timeout.as_secs(),
        });
    }

    Ok(PtyCapture {
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

fn wait_for_first_output(buffer: &Arc<Mutex<Vec<u8>>>, deadline: Instant) {
    let ready_at = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && Instant::now() < ready_at {
        if !buffer.lock().expect("PTY buffer lock").is_empty() {
            // One settle interval lets the initial redraw finish.
            std::thread::sleep(SETTLE_INTERVAL);
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
