//! Remote transport abstraction for sync operations.

use crate::error::TransportError;
use isosync_protocol::{ChangeBatch, ChangeToken, Record, RecordId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-record result of a save call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Record the outcome belongs to.
    pub id: RecordId,
    /// The record as acknowledged by the remote, or the failure.
    pub result: Result<Record, TransportError>,
}

/// Per-record result of a delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Record the outcome belongs to.
    pub id: RecordId,
    /// Success or the failure.
    pub result: Result<(), TransportError>,
}

/// A remote transport talks to the remote authority.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (a hosted record database, the reference server, a mock
/// for testing).
pub trait RemoteTransport: Send + Sync {
    /// Ensures the record zone exists. Idempotent.
    fn save_zone(&self) -> Result<(), TransportError>;

    /// Registers for change notifications. Idempotent.
    fn subscribe_to_changes(&self) -> Result<(), TransportError>;

    /// Saves records, returning one outcome per record.
    ///
    /// A call-level error means nothing was saved.
    fn save(&self, records: &[Record]) -> Result<Vec<SaveOutcome>, TransportError>;

    /// Deletes records, returning one outcome per ID.
    fn delete(&self, ids: &[RecordId]) -> Result<Vec<DeleteOutcome>, TransportError>;

    /// Fetches one page of changes after `since` (from the start if `None`).
    fn fetch_changes(
        &self,
        since: Option<&ChangeToken>,
        limit: usize,
    ) -> Result<ChangeBatch, TransportError>;
}

/// A scriptable transport for testing.
///
/// Saves are acknowledged by echoing the record with `sync_version + 1`
/// unless an outcome was scripted for that ID. Fetches pop scripted pages
/// and return an empty page once the script runs out.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    pages: Mutex<VecDeque<Result<ChangeBatch, TransportError>>>,
    save_outcomes: Mutex<HashMap<RecordId, TransportError>>,
    delete_outcomes: Mutex<HashMap<RecordId, TransportError>>,
    saved: Mutex<Vec<Record>>,
    deleted: Mutex<Vec<RecordId>>,
    fetch_tokens: Mutex<Vec<Option<ChangeToken>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pages: Mutex::new(VecDeque::new()),
            save_outcomes: Mutex::new(HashMap::new()),
            delete_outcomes: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fetch_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Queues a page for the next fetch.
    pub fn push_page(&self, page: ChangeBatch) {
        self.pages.lock().push_back(Ok(page));
    }

    /// Queues a failure for the next fetch.
    pub fn push_fetch_error(&self, error: TransportError) {
        self.pages.lock().push_back(Err(error));
    }

    /// Makes saves of `id` fail with `error`.
    pub fn fail_save(&self, id: RecordId, error: TransportError) {
        self.save_outcomes.lock().insert(id, error);
    }

    /// Makes deletes of `id` fail with `error`.
    pub fn fail_delete(&self, id: RecordId, error: TransportError) {
        self.delete_outcomes.lock().insert(id, error);
    }

    /// Clears scripted save and delete failures.
    pub fn clear_failures(&self) {
        self.save_outcomes.lock().clear();
        self.delete_outcomes.lock().clear();
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Checks if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns every record acknowledged so far.
    pub fn saved(&self) -> Vec<Record> {
        self.saved.lock().clone()
    }

    /// Returns every ID deleted so far.
    pub fn deleted(&self) -> Vec<RecordId> {
        self.deleted.lock().clone()
    }

    /// Returns the token passed to each fetch, in call order.
    pub fn fetch_tokens(&self) -> Vec<Option<ChangeToken>> {
        self.fetch_tokens.lock().clone()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NetworkUnavailable)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTransport for MockTransport {
    fn save_zone(&self) -> Result<(), TransportError> {
        self.ensure_connected()
    }

    fn subscribe_to_changes(&self) -> Result<(), TransportError> {
        self.ensure_connected()
    }

    fn save(&self, records: &[Record]) -> Result<Vec<SaveOutcome>, TransportError> {
        self.ensure_connected()?;
        let failures = self.save_outcomes.lock();
        let mut saved = self.saved.lock();

        Ok(records
            .iter()
            .map(|record| {
                let result = match failures.get(&record.id) {
                    Some(error) => Err(error.clone()),
                    None => {
                        let mut acked = record.clone();
                        acked.sync_version += 1;
                        acked.base_version = acked.sync_version;
                        saved.push(acked.clone());
                        Ok(acked)
                    }
                };
                SaveOutcome {
                    id: record.id,
                    result,
                }
            })
            .collect())
    }

    fn delete(&self, ids: &[RecordId]) -> Result<Vec<DeleteOutcome>, TransportError> {
        self.ensure_connected()?;
        let failures = self.delete_outcomes.lock();
        let mut deleted = self.deleted.lock();

        Ok(ids
            .iter()
            .map(|id| {
                let result = match failures.get(id) {
                    Some(error) => Err(error.clone()),
                    None => {
                        deleted.push(*id);
                        Ok(())
                    }
                };
                DeleteOutcome { id: *id, result }
            })
            .collect())
    }

    fn fetch_changes(
        &self,
        since: Option<&ChangeToken>,
        _limit: usize,
    ) -> Result<ChangeBatch, TransportError> {
        self.ensure_connected()?;
        self.fetch_tokens.lock().push(since.cloned());
        match self.pages.lock().pop_front() {
            Some(page) => page,
            None => Ok(ChangeBatch {
                new_token: since.cloned(),
                ..ChangeBatch::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isosync_protocol::SiteId;

    fn record(name: &str) -> Record {
        Record::new(SiteId::new("site"), name, "", 0)
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        assert_eq!(
            transport.fetch_changes(None, 10),
            Err(TransportError::NetworkUnavailable)
        );
        assert_eq!(transport.save(&[]), Err(TransportError::NetworkUnavailable));
        assert!(transport.fetch_tokens().is_empty());
    }

    #[test]
    fn save_acknowledges_with_bumped_sync_version() {
        let transport = MockTransport::new();
        let ok = record("ok");
        let bad = record("bad");
        transport.fail_save(bad.id, TransportError::QuotaExceeded);

        let outcomes = transport.save(&[ok.clone(), bad.clone()]).unwrap();
        assert_eq!(outcomes[0].result.as_ref().unwrap().sync_version, 1);
        assert_eq!(outcomes[1].result, Err(TransportError::QuotaExceeded));
        assert_eq!(transport.saved().len(), 1);
    }

    #[test]
    fn scripted_pages_then_empty() {
        let transport = MockTransport::new();
        transport.push_page(ChangeBatch {
            changed: vec![record("a")],
            new_token: Some(ChangeToken::from_sequence(1)),
            ..ChangeBatch::default()
        });

        let first = transport.fetch_changes(None, 10).unwrap();
        assert_eq!(first.changed.len(), 1);

        let token = ChangeToken::from_sequence(1);
        let second = transport.fetch_changes(Some(&token), 10).unwrap();
        assert!(second.is_empty());
        assert_eq!(second.new_token, Some(token.clone()));
        assert_eq!(transport.fetch_tokens(), vec![None, Some(token)]);
    }
}
