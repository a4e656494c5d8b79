//! Dashboard identity verification and gap-fill merge.
//!
//! The web dashboard is a secondary source: its values only fill gaps in the
//! canonical CLI/OAuth-derived snapshot. A session signed in as a different
//! account is a hard failure; stale or wrong-account dashboard data must
//! never be shown merged with the correct account's CLI data.

use crate::core::models::{
    CreditsSnapshot, OpenAIDashboardSnapshot, UsageSnapshot, normalize_email,
};
use crate::error::{MeterError, Result};

/// Verify the dashboard session belongs to the expected account.
///
/// Comparison is normalized (trimmed, lower-cased). A dashboard without a
/// signed-in email passes: absence of identity is not evidence of mismatch.
///
/// # Errors
///
/// `AccountMismatch` when both emails are present and differ.
pub fn verify_dashboard_identity(
    expected_email: &str,
    dashboard: &OpenAIDashboardSnapshot,
) -> Result<()> {
    let Some(actual) = dashboard.signed_in_email.as_deref() else {
        return Ok(());
    };
    if normalize_email(actual) == normalize_email(expected_email) {
        Ok(())
    } else {
        Err(MeterError::AccountMismatch {
            expected: expected_email.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Merge dashboard data into the canonical snapshot, filling gaps only.
///
/// A field already populated from the primary source is never overwritten.
/// Returns whether anything was filled.
pub fn merge_dashboard_into_snapshot(
    snapshot: &mut UsageSnapshot,
    dashboard: &OpenAIDashboardSnapshot,
) -> bool {
    let mut merged = false;

    if snapshot.primary.is_none() {
        if let Some(window) = &dashboard.primary_limit {
            snapshot.primary = Some(window.clone());
            merged = true;
        }
    }
    if snapshot.secondary.is_none() {
        if let Some(window) = &dashboard.secondary_limit {
            snapshot.secondary = Some(window.clone());
            merged = true;
        }
    }
    if snapshot.credits.is_none() {
        if let Some(remaining) = dashboard.credits_remaining {
            snapshot.credits = Some(CreditsSnapshot {
                remaining,
                updated_at: dashboard.updated_at,
            });
            merged = true;
        }
    }
    if let Some(plan) = &dashboard.account_plan {
        let identity = snapshot.identity.get_or_insert_default();
        if identity.login_method.is_none() {
            identity.login_method = Some(plan.clone());
            merged = true;
        }
    }

    merged
}
