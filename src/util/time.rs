//! Time parsing and formatting helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Parse a reset duration from text like `"(Resets in 23h 18m)"`,
/// `"Resets in 24h"`, or `"resets in 45m"`.
#[must_use]
pub fn parse_reset_duration(line: &str) -> Option<Duration> {
    let lower = line.to_lowercase();
    let resets_pos = lower.find("resets in ")?;
    let after = &line[resets_pos + 10..];

    let duration_text = after
        .find(')')
        .map_or(after, |paren| &after[..paren])
        .trim()
        .to_lowercase();

    let mut total_secs: u64 = 0;

    if let Some(h_pos) = duration_text.find('h') {
        let h_str = duration_text[..h_pos].split_whitespace().last()?;
        if let Ok(hours) = h_str.parse::<u64>() {
            total_secs += hours * 3600;
        }
    }

    if let Some(m_pos) = duration_text.find('m') {
        let before = &duration_text[..m_pos];
        let m_str = before.split_whitespace().last()?.trim_end_matches('h');
        if !m_str.is_empty() {
            if let Ok(minutes) = m_str.parse::<u64>() {
                total_secs += minutes * 60;
            }
        }
    }

    if total_secs > 0 {
        Some(Duration::from_secs(total_secs))
    } else {
        None
    }
}

/// Format a countdown to a future time ("in 2h 15m").
#[must_use]
pub fn format_countdown(target: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = target.signed_duration_since(now);

    if duration.num_seconds() <= 0 {
        return "now".to_string();
    }

    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;

    if hours > 24 {
        let days = hours / 24;
        format!("in {days} day{}", if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {hours}h {minutes}m")
    } else if minutes > 0 {
        format!("in {minutes}m")
    } else {
        let seconds = duration.num_seconds();
        format!("in {seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn parses_hours_and_minutes() {
        assert_eq!(
            parse_reset_duration("gemini-2.5-pro - 99.3% (Resets in 23h 18m)"),
            Some(Duration::from_secs(23 * 3600 + 18 * 60))
        );
    }

    #[test]
    fn parses_hours_only() {
        assert_eq!(
            parse_reset_duration("100.0% (Resets in 24h)"),
            Some(Duration::from_secs(24 * 3600))
        );
    }

    #[test]
    fn parses_minutes_only() {
        assert_eq!(
            parse_reset_duration("99.0% (Resets in 45m)"),
            Some(Duration::from_secs(45 * 60))
        );
    }

    #[test]
    fn no_reset_text_is_none() {
        assert_eq!(parse_reset_duration("99.0% remaining"), None);
    }

    #[test]
    fn countdown_hours() {
        let target = Utc::now() + ChronoDuration::hours(3) + ChronoDuration::minutes(30);
        assert!(format_countdown(target).contains("3h"));
    }

    #[test]
    fn countdown_past_is_now() {
        let target = Utc::now() - ChronoDuration::minutes(5);
        assert_eq!(format_countdown(target), "now");
    }
}
