//! Periodic refresh timers.
//!
//! One background timer task per refresh category (usage, token-cost).
//! Changing an interval cancels and restarts that category's timer; an
//! in-flight refresh is never force-cancelled: each tick spawns the
//! refresh as a detached task, so aborting a timer only stops future ticks
//! and the next tick picks up the new interval. Overlap is handled by the
//! store's own re-entrancy guard.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::store::UsageStore;

/// Default cadence for the slow token-cost timer.
pub const DEFAULT_TOKEN_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Owns the periodic timer tasks for a store.
pub struct RefreshScheduler {
    store: Arc<UsageStore>,
    usage_handle: Mutex<Option<JoinHandle<()>>>,
    token_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(store: Arc<UsageStore>) -> Self {
        Self {
            store,
            usage_handle: Mutex::new(None),
            token_handle: Mutex::new(None),
        }
    }

    /// Start both timers: usage at the store's base interval, token-cost at
    /// the default slow cadence.
    pub fn start(&self) {
        self.restart_usage_timer(self.store.refresh_interval());
        self.restart_token_timer(DEFAULT_TOKEN_INTERVAL);
    }

    /// Apply a new usage-refresh interval: the timer restarts, the next
    /// tick uses the new cadence.
    pub fn set_usage_interval(&self, interval: Duration) {
        tracing::info!(secs = interval.as_secs(), "usage refresh interval changed");
        self.restart_usage_timer(interval);
    }

    /// Apply a new token-cost interval.
    pub fn set_token_interval(&self, interval: Duration) {
        tracing::info!(secs = interval.as_secs(), "token refresh interval changed");
        self.restart_token_timer(interval);
    }

    /// Stop both timers. In-flight refreshes run to completion.
    pub fn shutdown(&self) {
        if let Some(handle) = self.usage_handle.lock().expect("usage timer lock").take() {
            handle.abort();
        }
        if let Some(handle) = self.token_handle.lock().expect("token timer lock").take() {
            handle.abort();
        }
    }

    fn restart_usage_timer(&self, interval: Duration) {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would double up with the startup
            // refresh the host app runs.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.refresh(false).await;
                });
            }
        });

        let mut slot = self.usage_handle.lock().expect("usage timer lock");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn restart_token_timer(&self, interval: Duration) {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.refresh_token_usage(false).await;
                });
            }
        });

        let mut slot = self.token_handle.lock().expect("token timer lock");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
