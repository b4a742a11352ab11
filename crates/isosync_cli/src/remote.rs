//! Transport over an in-process reference server.

use isosync_engine::{DeleteOutcome, RemoteTransport, SaveOutcome, TransportError};
use isosync_protocol::{ChangeBatch, ChangeToken, Record, RecordId};
use isosync_server::{ServerError, SyncServer};
use std::sync::Arc;
use std::time::Duration;

/// Connects an engine to a [`SyncServer`] in the same process.
pub struct ServerTransport {
    server: Arc<SyncServer>,
}

impl ServerTransport {
    /// Creates a transport for `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

fn map_error(error: ServerError) -> TransportError {
    match error {
        ServerError::NotAuthenticated => TransportError::NotAuthenticated,
        // An unknown token means the zone was reset; both force a full resync.
        ServerError::ZoneNotFound | ServerError::InvalidToken => TransportError::ZoneNotFound,
        ServerError::RecordNotFound(_) => TransportError::RecordNotFound,
        ServerError::QuotaExceeded(_) => TransportError::QuotaExceeded,
        ServerError::Conflict { server } => TransportError::ConflictDetected { server },
        ServerError::Unavailable => TransportError::NetworkUnavailable,
        ServerError::Throttled(secs) => TransportError::RetryLater(secs.map(Duration::from_secs)),
        ServerError::InvalidRequest(_) | ServerError::Internal(_) => {
            TransportError::ServerError(error.to_string())
        }
    }
}

impl RemoteTransport for ServerTransport {
    fn save_zone(&self) -> Result<(), TransportError> {
        self.server.handle_save_zone().map_err(map_error)
    }

    fn subscribe_to_changes(&self) -> Result<(), TransportError> {
        self.server.handle_subscribe().map_err(map_error)
    }

    fn save(&self, records: &[Record]) -> Result<Vec<SaveOutcome>, TransportError> {
        let results = self.server.handle_save(records.to_vec()).map_err(map_error)?;
        Ok(results
            .into_iter()
            .map(|(id, result)| SaveOutcome {
                id,
                result: result.map_err(map_error),
            })
            .collect())
    }

    fn delete(&self, ids: &[RecordId]) -> Result<Vec<DeleteOutcome>, TransportError> {
        let results = self.server.handle_delete(ids.to_vec()).map_err(map_error)?;
        Ok(results
            .into_iter()
            .map(|(id, result)| DeleteOutcome {
                id,
                result: result.map_err(map_error),
            })
            .collect())
    }

    fn fetch_changes(
        &self,
        since: Option<&ChangeToken>,
        limit: usize,
    ) -> Result<ChangeBatch, TransportError> {
        self.server.handle_fetch(since, limit).map_err(map_error)
    }
}
