//! Record zone: current records plus the change log clients page through.

use crate::error::{ServerError, ServerResult};
use isosync_protocol::{ChangeFeed, ChangeKind, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One page of the change log, resolved to current records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZonePage {
    /// Latest state of each changed record.
    pub changed: Vec<Record>,
    /// Records deleted since the cursor.
    pub deleted: Vec<RecordId>,
    /// Sequence to resume from.
    pub cursor: u64,
    /// True if entries remain after `cursor`.
    pub has_more: bool,
}

/// A record zone.
///
/// The zone maintains:
/// - The current copy of every live record
/// - A change log compacted to the latest entry per record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Zone {
    records: BTreeMap<RecordId, Record>,
    feed: ChangeFeed,
}

impl Zone {
    /// Creates an empty zone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record if it is based on the current stored revision.
    ///
    /// Accepted records are stored with `sync_version + 1`, which also
    /// becomes their base. A record whose `base_version` is behind the
    /// stored copy was edited without seeing it and is rejected with
    /// [`ServerError::Conflict`] carrying the stored copy.
    pub fn save(&mut self, record: Record, quota: Option<usize>) -> ServerResult<Record> {
        match self.records.get(&record.id) {
            Some(stored) if record.base_version < stored.sync_version => {
                return Err(ServerError::Conflict {
                    server: Box::new(stored.clone()),
                });
            }
            Some(_) => {}
            None => {
                if let Some(quota) = quota {
                    if self.records.len() >= quota {
                        return Err(ServerError::QuotaExceeded(quota));
                    }
                }
            }
        }

        let mut stored = record;
        if let Some(current) = self.records.get(&stored.id) {
            stored.sync_version = stored.sync_version.max(current.sync_version);
        }
        stored.sync_version += 1;
        stored.base_version = stored.sync_version;
        stored.deleted_at = None;
        self.feed.emit(stored.id, ChangeKind::Changed);
        self.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    /// Deletes a record and logs the deletion.
    pub fn delete(&mut self, id: RecordId) -> ServerResult<()> {
        if self.records.remove(&id).is_none() {
            return Err(ServerError::RecordNotFound(id));
        }
        self.feed.emit(id, ChangeKind::Deleted);
        Ok(())
    }

    /// Returns up to `limit` changes after `cursor`.
    pub fn fetch(&self, cursor: u64, limit: usize) -> ServerResult<ZonePage> {
        if cursor > self.feed.latest_sequence() {
            return Err(ServerError::InvalidToken);
        }

        let entries = self.feed.poll(cursor, limit);
        let mut page = ZonePage {
            cursor: entries.last().map(|e| e.sequence).unwrap_or(cursor),
            ..ZonePage::default()
        };

        for entry in entries {
            match entry.kind {
                ChangeKind::Changed => match self.records.get(&entry.record_id) {
                    Some(record) => page.changed.push(record.clone()),
                    None => {
                        return Err(ServerError::Internal(format!(
                            "change log references missing record {}",
                            entry.record_id
                        )))
                    }
                },
                ChangeKind::Deleted => page.deleted.push(entry.record_id),
            }
        }
        page.has_more = self.feed.has_after(page.cursor);
        Ok(page)
    }

    /// Returns the stored copy of a record.
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Returns all stored records.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the zone holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the latest change sequence.
    pub fn latest_sequence(&self) -> u64 {
        self.feed.latest_sequence()
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
    fn save_bumps_sync_version_and_logs() {
        let mut zone = Zone::new();
        let stored = zone.save(record("a"), None).unwrap();
        assert_eq!(stored.sync_version, 1);
        assert_eq!(zone.latest_sequence(), 1);

        let again = zone.save(stored.clone(), None).unwrap();
        assert_eq!(again.sync_version, 2);
    }

    #[test]
    fn stale_save_is_a_conflict() {
        let mut zone = Zone::new();
        let original = record("a");
        let stored = zone.save(original.clone(), None).unwrap();

        let err = zone.save(original, None).unwrap_err();
        assert_eq!(
            err,
            ServerError::Conflict {
                server: Box::new(stored)
            }
        );
    }

    #[test]
    fn bumped_sync_version_does_not_skip_newer_revision() {
        let mut zone = Zone::new();
        let first = zone.save(record("a"), None).unwrap();
        let second = zone.save(first.clone(), None).unwrap();

        let mut resolved = first;
        resolved.sync_version = 9;
        let err = zone.save(resolved, None).unwrap_err();
        assert_eq!(
            err,
            ServerError::Conflict {
                server: Box::new(second.clone())
            }
        );

        let mut rebased = second;
        rebased.sync_version = 9;
        let stored = zone.save(rebased, None).unwrap();
        assert_eq!(stored.sync_version, 10);
        assert_eq!(stored.base_version, 10);
    }

    #[test]
    fn quota_applies_to_new_records_only() {
        let mut zone = Zone::new();
        let stored = zone.save(record("a"), Some(1)).unwrap();
        assert_eq!(
            zone.save(record("b"), Some(1)),
            Err(ServerError::QuotaExceeded(1))
        );
        assert!(zone.save(stored, Some(1)).is_ok());
    }

    #[test]
    fn fetch_pages_and_compacts() {
        let mut zone = Zone::new();
        let a = zone.save(record("a"), None).unwrap();
        let b = zone.save(record("b"), None).unwrap();
        zone.save(a.clone(), None).unwrap();
        zone.delete(b.id).unwrap();

        let first = zone.fetch(0, 1).unwrap();
        assert_eq!(first.changed.len(), 1);
        assert_eq!(first.changed[0].sync_version, 2);
        assert!(first.has_more);

        let second = zone.fetch(first.cursor, 10).unwrap();
        assert_eq!(second.deleted, vec![b.id]);
        assert!(!second.has_more);

        let empty = zone.fetch(second.cursor, 10).unwrap();
        assert_eq!(empty, ZonePage { cursor: second.cursor, ..ZonePage::default() });
    }

    #[test]
    fn unknown_cursor_is_rejected() {
        let zone = Zone::new();
        assert_eq!(zone.fetch(5, 10), Err(ServerError::InvalidToken));
        assert!(zone.fetch(0, 10).unwrap().changed.is_empty());
    }

    #[test]
    fn delete_missing_record() {
        let mut zone = Zone::new();
        let r = record("a");
        assert_eq!(zone.delete(r.id), Err(ServerError::RecordNotFound(r.id)));
    }
}
