//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for sync operations.
///
/// Missing fields deserialize to the values of [`SyncConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether background sync may run.
    pub is_enabled: bool,
    /// Seconds between background cycles.
    pub sync_interval_seconds: u64,
    /// Maximum records per save/delete call and per fetched page.
    pub batch_size: usize,
    /// Maximum attempts made by [`crate::SyncEngine::sync_with_retry`].
    pub max_retry_attempts: u32,
    /// A stored token older than this forces a full fetch.
    pub incremental_sync_threshold_seconds: u64,
    /// Backoff configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Short interval, large batches, many retries.
    pub fn aggressive() -> Self {
        Self {
            is_enabled: true,
            sync_interval_seconds: 60,
            batch_size: 200,
            max_retry_attempts: 10,
            incremental_sync_threshold_seconds: 24 * 3600,
            retry: RetryConfig::default().with_max_delay(Duration::from_secs(60)),
        }
    }

    /// Long interval, small batches, few retries.
    pub fn conservative() -> Self {
        Self {
            is_enabled: true,
            sync_interval_seconds: 30 * 60,
            batch_size: 50,
            max_retry_attempts: 3,
            incremental_sync_threshold_seconds: 600,
            retry: RetryConfig::default(),
        }
    }

    /// Enables or disables background sync.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = enabled;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_seconds = interval.as_secs();
        self
    }

    /// Sets the batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the maximum retry attempts.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Sets the incremental sync threshold.
    pub fn with_incremental_threshold(mut self, threshold: Duration) -> Self {
        self.incremental_sync_threshold_seconds = threshold.as_secs();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the background sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    /// Returns the incremental threshold in milliseconds.
    pub fn incremental_threshold_ms(&self) -> i64 {
        i64::try_from(self.incremental_sync_threshold_seconds.saturating_mul(1000))
            .unwrap_or(i64::MAX)
    }

    /// Returns the effective batch size (at least one).
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            is_enabled: true,
            sync_interval_seconds: 300,
            batch_size: 100,
            max_retry_attempts: 5,
            incremental_sync_threshold_seconds: 3600,
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration with the given base and cap, without jitter.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base_delay_ms: duration_ms(base),
            max_delay_ms: duration_ms(cap),
            jitter: false,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_ms(delay);
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(delay);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the base delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns the maximum delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Calculates the delay for a given attempt (1-indexed), without jitter.
    ///
    /// `min(base * 2^(attempt - 1), cap)`; attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
