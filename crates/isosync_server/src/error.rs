//! Error types for the sync server.

use isosync_protocol::{Record, RecordId};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller is not authenticated.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The zone has not been created.
    #[error("zone not found")]
    ZoneNotFound,

    /// The continuation token does not belong to this zone.
    #[error("invalid continuation token")]
    InvalidToken,

    /// The record does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// Saving would exceed the record quota.
    #[error("record quota of {0} exceeded")]
    QuotaExceeded(usize),

    /// The stored copy is newer than the one sent.
    #[error("conflict on record {}: server has sync version {}", server.id, server.sync_version)]
    Conflict {
        /// The stored copy.
        server: Box<Record>,
    },

    /// The server is temporarily unreachable.
    #[error("service unavailable")]
    Unavailable,

    /// The caller should back off for the given number of seconds.
    #[error("throttled")]
    Throttled(Option<u64>),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthenticated
                | ServerError::ZoneNotFound
                | ServerError::InvalidToken
                | ServerError::RecordNotFound(_)
                | ServerError::QuotaExceeded(_)
                | ServerError::Conflict { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unavailable | ServerError::Throttled(_) | ServerError::Internal(_)
        )
    }
}
