//! Persisted sync bookkeeping.

use crate::change_feed::ChangeToken;
use serde::{Deserialize, Serialize};

/// Singleton sync state kept by the local store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncState {
    /// Continuation token from the last completed pull.
    pub last_sync_token: Option<ChangeToken>,
    /// Completion time of the last successful cycle (unix ms).
    pub last_sync_at: Option<i64>,
    /// Records awaiting push, as of the last cycle.
    pub pending_change_count: u64,
    /// Conflicts awaiting manual resolution.
    pub conflict_count: u64,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl SyncState {
    /// Returns true if an incremental pull is allowed at `now`.
    ///
    /// Requires a stored token and a previous success no older than
    /// `threshold_ms`.
    pub fn allows_incremental(&self, now: i64, threshold_ms: i64) -> bool {
        match (&self.last_sync_token, self.last_sync_at) {
            (Some(_), Some(at)) => now.saturating_sub(at) <= threshold_ms,
            _ => false,
        }
    }

    /// Records a successful cycle.
    pub fn record_success(&mut self, token: Option<ChangeToken>, at: i64) {
        if token.is_some() {
            self.last_sync_token = token;
        }
        self.last_sync_at = Some(at);
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Records a failed cycle.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(message.into());
    }
}
