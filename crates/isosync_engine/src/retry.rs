//! Failure classification and exponential backoff.

use crate::config::RetryConfig;
use crate::error::{SyncError, TransportError};
use rand::Rng;
use std::time::Duration;

/// How a failed cycle should be treated by a caller that loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; retry after a backoff delay.
    Retryable,
    /// Credentials problem; stop looping until the user intervenes.
    AuthFailure,
    /// A transport conflict that reached the caller; resolve and resync.
    Conflict,
    /// Will not succeed on repetition.
    Terminal,
    /// The cycle was cancelled.
    Cancelled,
}

impl FailureClass {
    /// Classifies a sync error.
    pub fn of(error: &SyncError) -> Self {
        match error {
            SyncError::Transport(e) => Self::of_transport(e),
            SyncError::Cancelled => FailureClass::Cancelled,
            SyncError::Store(_)
            | SyncError::Codec(_)
            | SyncError::ConflictNotFound(_)
            | SyncError::InvalidResolution(_)
            | SyncError::NoRuntime => FailureClass::Terminal,
        }
    }

    /// Classifies a transport error.
    pub fn of_transport(error: &TransportError) -> Self {
        match error {
            TransportError::NetworkUnavailable
            | TransportError::ServerError(_)
            | TransportError::RetryLater(_) => FailureClass::Retryable,
            TransportError::NotAuthenticated => FailureClass::AuthFailure,
            TransportError::ConflictDetected { .. } => FailureClass::Conflict,
            TransportError::QuotaExceeded
            | TransportError::ZoneNotFound
            | TransportError::RecordNotFound => FailureClass::Terminal,
        }
    }
}

/// Tracks consecutive failures and computes the delay before the next attempt.
#[derive(Debug, Clone)]
pub struct BackoffController {
    config: RetryConfig,
    attempt: u32,
}

impl BackoffController {
    /// Creates a controller with no recorded failures.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the number of failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before retrying.
    ///
    /// A retry-later hint from the remote overrides the computed delay.
    pub fn next_delay(&mut self, error: &SyncError) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        if let Some(delay) = error.retry_after() {
            return delay;
        }
        self.delay_for(self.attempt)
    }

    /// Returns the delay for `attempt` (1-indexed), with jitter if enabled.
    ///
    /// Jitter never pushes the delay past the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.config.delay_for_attempt(attempt);
        if self.config.jitter && !delay.is_zero() {
            let factor: f64 = rand::thread_rng().gen_range(0.0..=0.25);
            (delay + delay.mul_f64(factor)).min(self.config.max_delay())
        } else {
            delay
        }
    }

    /// Returns the capped delay used after terminal failures.
    pub fn cap(&self) -> Duration {
        self.config.max_delay()
    }

    /// Clears the failure count after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Returns the jitter-free delays for attempts `1..=attempts`.
pub fn backoff_schedule(config: &RetryConfig, attempts: u32) -> Vec<Duration> {
    (1..=attempts)
        .map(|attempt| config.delay_for_attempt(attempt))
        .collect()
}
