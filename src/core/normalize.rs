//! Scraped-text normalization.
//!
//! PTY transcripts arrive with terminal control sequences and box-drawing
//! noise; this module strips them and pulls structured fields out via
//! pattern matching. Extraction returns raw parsed values; clamping happens
//! at `RateWindow` construction.

use std::sync::OnceLock;

use regex::Regex;

/// How many lines past a matched label the percent scan looks.
const PERCENT_SCAN_WINDOW: usize = 4;

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,3})\s*%\s*(used|left)").expect("valid regex"))
}

fn json_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"error"\s*:\s*\{[^}]*"message"\s*:\s*"([^"]+)""#).expect("valid regex")
    })
}

/// Remove terminal escape sequences from raw PTY output.
///
/// Handles CSI sequences (`ESC [ ... final`), OSC sequences
/// (`ESC ] ... BEL` / `ESC ] ... ESC \`), and lone two-byte escapes.
/// Total function: any input yields printable text.
#[must_use]
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if c != '\r' {
                result.push(c);
            }
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameter/intermediate bytes until a final byte @..~
                for next in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&next) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // OSC: terminated by BEL or ST (ESC \)
                while let Some(next) = chars.next() {
                    if next == '\x07' {
                        break;
                    }
                    if next == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                // Two-byte escape (e.g. ESC ( B)
                chars.next();
            }
            None => {}
        }
    }

    result
}

/// Extract a quota percentage near a label line.
///
/// Scans line-by-line for `label` (case-insensitive substring), then scans
/// the matching line plus a bounded forward window for `"<N>% used"` or
/// `"<N>% left"`. The canonical unit is percent *remaining*: "used" figures
/// are converted via `100 - N`. Returns the raw converted integer without
/// clamping; returns `None` if no match lands inside the window.
#[must_use]
pub fn extract_percent(label: &str, text: &str) -> Option<i64> {
    let label_lower = label.to_lowercase();
    let lines: Vec<&str> = text.lines().collect();

    let start = lines
        .iter()
        .position(|line| line.to_lowercase().contains(&label_lower))?;

    for line in lines.iter().skip(start).take(PERCENT_SCAN_WINDOW + 1) {
        if let Some(caps) = percent_re().captures(line) {
            let value: i64 = caps[1].parse().ok()?;
            return match caps[2].to_lowercase().as_str() {
                "used" => Some(100 - value),
                _ => Some(value),
            };
        }
    }

    None
}

/// Generic single-capture-group extraction, trimmed of whitespace.
///
/// Returns `None` when the pattern is invalid or does not match.
#[must_use]
pub fn extract_first(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(text)?;
    let value = caps.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Classify known failure text in a scraped transcript into a
/// human-readable hint.
///
/// Specific matches (a JSON error payload) take priority over generic
/// substring matches; all matching is case-insensitive. Returns `None` when
/// the transcript shows no recognizable failure.
#[must_use]
pub fn extract_usage_error(text: &str) -> Option<String> {
    // JSON-embedded error payloads are the most specific signal.
    if let Some(caps) = json_error_re().captures(text) {
        let message = caps[1].trim();
        if !message.is_empty() {
            return Some(format!("Provider reported: {message}"));
        }
    }

    let lower = text.to_lowercase();

    let relogin_markers = [
        "token expired",
        "oauth token has expired",
        "please run /login",
        "authentication_error",
        "not logged in",
        "unauthorized",
    ];
    if relogin_markers.iter().any(|m| lower.contains(m)) {
        return Some("Session expired. Run the provider's login command again.".to_string());
    }

    let generic_markers = ["malformed usage", "invalid usage payload", "usage unavailable"];
    if generic_markers.iter().any(|m| lower.contains(m)) {
        return Some("Provider returned unreadable usage data.".to_string());
    }

    None
}
