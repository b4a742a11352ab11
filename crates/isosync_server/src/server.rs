//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::zone::Zone;
use isosync_protocol::{ChangeBatch, ChangeToken, Record, RecordId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Serializable contents of a [`SyncServer`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Server configuration.
    pub config: ServerConfig,
    /// The zone, if created.
    pub zone: Option<Zone>,
}

/// The reference sync server.
///
/// This server is the single remote authority replicas sync against. It
/// owns one record zone and answers save, delete and fetch calls.
///
/// # Example
///
/// ```
/// use isosync_server::{SyncServer, ServerConfig};
///
/// let server = SyncServer::new(ServerConfig::default());
/// server.create_zone();
///
/// let page = server.handle_fetch(None, 100).unwrap();
/// assert!(page.changed.is_empty());
/// ```
pub struct SyncServer {
    config: ServerConfig,
    zone: RwLock<Option<Zone>>,
    injected: Mutex<VecDeque<ServerError>>,
}

impl SyncServer {
    /// Creates a new sync server without a zone.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            zone: RwLock::new(None),
            injected: Mutex::new(VecDeque::new()),
        }
    }

    /// Restores a server from a snapshot.
    pub fn from_snapshot(snapshot: ServerSnapshot) -> Self {
        Self {
            config: snapshot.config,
            zone: RwLock::new(snapshot.zone),
            injected: Mutex::new(VecDeque::new()),
        }
    }

    /// Captures the current contents.
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            config: self.config.clone(),
            zone: self.zone.read().clone(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Creates the zone. Idempotent.
    pub fn create_zone(&self) {
        let mut zone = self.zone.write();
        if zone.is_none() {
            debug!("zone created");
            *zone = Some(Zone::new());
        }
    }

    /// Drops the zone and everything in it.
    pub fn delete_zone(&self) {
        *self.zone.write() = None;
    }

    /// Returns true if the zone exists.
    pub fn has_zone(&self) -> bool {
        self.zone.read().is_some()
    }

    /// Makes the next call fail with `error`. Calls queue up in order.
    pub fn fail_next(&self, error: ServerError) {
        self.injected.lock().push_back(error);
    }

    /// Handles a zone creation request.
    pub fn handle_save_zone(&self) -> ServerResult<()> {
        self.take_injected()?;
        self.create_zone();
        Ok(())
    }

    /// Handles a subscription request.
    pub fn handle_subscribe(&self) -> ServerResult<()> {
        self.take_injected()?;
        if self.has_zone() {
            Ok(())
        } else {
            Err(ServerError::ZoneNotFound)
        }
    }

    /// Handles a save request, returning one result per record.
    pub fn handle_save(
        &self,
        records: Vec<Record>,
    ) -> ServerResult<Vec<(RecordId, ServerResult<Record>)>> {
        self.take_injected()?;
        self.check_batch(records.len())?;

        let mut guard = self.zone.write();
        let zone = guard.as_mut().ok_or(ServerError::ZoneNotFound)?;
        let quota = self.config.record_quota;

        Ok(records
            .into_iter()
            .map(|record| {
                let id = record.id;
                let result = zone.save(record, quota);
                debug!(record_id = %id, accepted = result.is_ok(), "save");
                (id, result)
            })
            .collect())
    }

    /// Handles a delete request, returning one result per ID.
    pub fn handle_delete(
        &self,
        ids: Vec<RecordId>,
    ) -> ServerResult<Vec<(RecordId, ServerResult<()>)>> {
        self.take_injected()?;
        self.check_batch(ids.len())?;

        let mut guard = self.zone.write();
        let zone = guard.as_mut().ok_or(ServerError::ZoneNotFound)?;

        Ok(ids
            .into_iter()
            .map(|id| {
                let result = zone.delete(id);
                debug!(record_id = %id, accepted = result.is_ok(), "delete");
                (id, result)
            })
            .collect())
    }

    /// Handles a fetch request.
    ///
    /// Returns the latest state of every record changed after `token`, at
    /// most `limit` (capped by `max_fetch_batch`) per page.
    pub fn handle_fetch(
        &self,
        token: Option<&ChangeToken>,
        limit: usize,
    ) -> ServerResult<ChangeBatch> {
        self.take_injected()?;
        let cursor = match token {
            Some(token) => token.sequence().ok_or(ServerError::InvalidToken)?,
            None => 0,
        };
        let limit = limit.clamp(1, self.config.max_fetch_batch);

        let guard = self.zone.read();
        let zone = guard.as_ref().ok_or(ServerError::ZoneNotFound)?;
        let page = zone.fetch(cursor, limit)?;
        debug!(
            cursor,
            new_cursor = page.cursor,
            changed = page.changed.len(),
            deleted = page.deleted.len(),
            has_more = page.has_more,
            "fetch"
        );

        Ok(ChangeBatch {
            changed: page.changed,
            deleted_ids: page.deleted,
            new_token: Some(ChangeToken::from_sequence(page.cursor)),
            has_more: page.has_more,
        })
    }

    /// Returns the stored copy of a record.
    pub fn record(&self, id: RecordId) -> Option<Record> {
        self.zone.read().as_ref().and_then(|zone| zone.get(id).cloned())
    }

    /// Returns the number of stored records.
    pub fn record_count(&self) -> usize {
        self.zone.read().as_ref().map_or(0, Zone::len)
    }

    /// Returns the latest change sequence.
    pub fn latest_sequence(&self) -> u64 {
        self.zone.read().as_ref().map_or(0, Zone::latest_sequence)
    }

    fn take_injected(&self) -> ServerResult<()> {
        match self.injected.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_batch(&self, len: usize) -> ServerResult<()> {
        if len > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {len} > {}",
                self.config.max_push_batch
            )));
        }
        Ok(())
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isosync_protocol::SiteId;

    fn record(name: &str) -> Record {
        Record::new(SiteId::new("site"), name, "body", 1_000)
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::default();
        assert!(!server.has_zone());
        assert_eq!(server.handle_fetch(None, 10), Err(ServerError::ZoneNotFound));
        assert_eq!(server.handle_subscribe(), Err(ServerError::ZoneNotFound));

        server.handle_save_zone().unwrap();
        server.handle_save_zone().unwrap();
        assert!(server.has_zone());
        assert_eq!(server.record_count(), 0);
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::default();
        server.create_zone();

        let results = server.handle_save(vec![record("a"), record("b")]).unwrap();
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let page = server.handle_fetch(None, 10).unwrap();
        assert_eq!(page.changed.len(), 2);
        assert!(!page.has_more);

        let next = server.handle_fetch(page.new_token.as_ref(), 10).unwrap();
        assert!(next.is_empty());
        assert_eq!(next.new_token, page.new_token);
    }

    #[test]
    fn fetch_is_capped_by_config() {
        let server = SyncServer::new(ServerConfig::new().with_max_fetch_batch(1));
        server.create_zone();
        server.handle_save(vec![record("a"), record("b")]).unwrap();

        let page = server.handle_fetch(None, 100).unwrap();
        assert_eq!(page.changed.len(), 1);
        assert!(page.has_more);
    }

    #[test]
    fn foreign_token_is_rejected() {
        let server = SyncServer::default();
        server.create_zone();
        let token = ChangeToken::from_bytes(vec![1, 2, 3]);
        assert_eq!(server.handle_fetch(Some(&token), 10), Err(ServerError::InvalidToken));
    }

    #[test]
    fn injected_failures_apply_once() {
        let server = SyncServer::default();
        server.create_zone();
        server.fail_next(ServerError::Unavailable);

        assert_eq!(server.handle_fetch(None, 10), Err(ServerError::Unavailable));
        assert!(server.handle_fetch(None, 10).is_ok());
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let server = SyncServer::new(ServerConfig::new().with_max_push_batch(1));
        server.create_zone();
        let err = server.handle_save(vec![record("a"), record("b")]).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn snapshot_roundtrip_through_json() {
        let server = SyncServer::default();
        server.create_zone();
        let saved = server.handle_save(vec![record("a")]).unwrap();
        let id = saved[0].0;

        let json = serde_json::to_string(&server.snapshot()).unwrap();
        let restored = SyncServer::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.record(id), server.record(id));
        assert_eq!(restored.latest_sequence(), 1);
    }
}
