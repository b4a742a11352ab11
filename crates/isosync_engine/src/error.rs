//! Error types for the sync engine.

use isosync_protocol::{CodecError, ConflictId, Record, RecordId};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a remote transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Credentials are missing or were rejected.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The remote could not be reached.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// The account is over its storage quota.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// The record zone does not exist on the remote.
    #[error("zone not found")]
    ZoneNotFound,

    /// The remote has no record with the requested ID.
    #[error("record not found")]
    RecordNotFound,

    /// The remote holds a newer revision than the one sent.
    #[error("conflict detected for record {}", server.id)]
    ConflictDetected {
        /// The remote's current copy.
        server: Box<Record>,
    },

    /// The remote asked the client to back off.
    #[error("retry later")]
    RetryLater(Option<Duration>),

    /// The remote failed internally.
    #[error("server error: {0}")]
    ServerError(String),
}

impl TransportError {
    /// Returns true if the failed call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkUnavailable
                | TransportError::ServerError(_)
                | TransportError::RetryLater(_)
        )
    }

    /// Returns the delay the remote asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RetryLater(delay) => *delay,
            _ => None,
        }
    }

    /// Returns the short classification name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::NotAuthenticated => "not-authenticated",
            TransportError::NetworkUnavailable => "network-unavailable",
            TransportError::QuotaExceeded => "quota-exceeded",
            TransportError::ZoneNotFound => "zone-not-found",
            TransportError::RecordNotFound => "record-not-found",
            TransportError::ConflictDetected { .. } => "conflict-detected",
            TransportError::RetryLater(_) => "retry-later",
            TransportError::ServerError(_) => "server-error",
        }
    }
}

/// Failures reported by a local store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with this ID.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// A record with this ID already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(RecordId),

    /// Encoding or decoding a stored value failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The storage backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The remote transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// No queued conflict with this ID.
    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// The chosen record cannot resolve the conflict.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// Live sync was started outside a tokio runtime.
    #[error("live sync requires a tokio runtime")]
    NoRuntime,
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if background sync must stop on this error.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Transport(TransportError::NotAuthenticated))
    }

    /// Returns the delay the remote asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Transport(e) => e.retry_after(),
            _ => None,
        }
    }
}
