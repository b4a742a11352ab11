//! Local store abstraction and an in-memory implementation.

use crate::error::{StoreError, StoreResult};
use isosync_protocol::{ConflictId, PendingConflict, Record, RecordId, SyncState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Durable, versioned record storage consumed by the sync engine.
///
/// Every mutation is committed on its own; the engine never needs a
/// transaction spanning several records.
pub trait LocalStore: Send + Sync {
    /// Looks up a record by ID.
    fn get_node(&self, id: RecordId) -> StoreResult<Option<Record>>;

    /// Looks up a record by its external source identity.
    fn get_node_by_source(&self, source: &str, source_id: &str) -> StoreResult<Option<Record>>;

    /// Inserts a new record and returns it as stored.
    fn create_node(&self, record: Record) -> StoreResult<Record>;

    /// Replaces an existing record and returns it as stored.
    fn update_node(&self, record: Record) -> StoreResult<Record>;

    /// Deletes a record and any queued conflicts for it.
    ///
    /// Returns false if the record did not exist.
    fn delete_node(&self, id: RecordId) -> StoreResult<bool>;

    /// Returns records with unsynced local edits written after `since_version`,
    /// in write order.
    fn get_pending_changes(&self, since_version: u64) -> StoreResult<Vec<Record>>;

    /// Reads the sync state singleton.
    fn get_sync_state(&self) -> StoreResult<SyncState>;

    /// Replaces the sync state singleton.
    fn update_sync_state(&self, state: &SyncState) -> StoreResult<()>;

    /// Queues a conflict for manual resolution, replacing any earlier
    /// conflict queued for the same record.
    fn enqueue_conflict(&self, conflict: PendingConflict) -> StoreResult<()>;

    /// Returns queued conflicts, oldest first.
    fn pending_conflicts(&self) -> StoreResult<Vec<PendingConflict>>;

    /// Removes a queued conflict.
    fn remove_conflict(&self, id: ConflictId) -> StoreResult<Option<PendingConflict>>;
}

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Logical write clock.
    pub db_version: u64,
    /// All records, including pending tombstones.
    pub records: Vec<Record>,
    /// Queued manual conflicts.
    pub conflicts: Vec<PendingConflict>,
    /// Sync state singleton.
    pub sync_state: SyncState,
}

#[derive(Debug, Default)]
struct StoreData {
    db_version: u64,
    records: BTreeMap<RecordId, Record>,
    conflicts: BTreeMap<RecordId, PendingConflict>,
    sync_state: SyncState,
    failing: BTreeSet<RecordId>,
}

impl StoreData {
    fn stamp(&mut self, record: &mut Record) {
        self.db_version += 1;
        record.crdt.db_version = self.db_version;
    }

    fn check_writable(&self, id: RecordId) -> StoreResult<()> {
        if self.failing.contains(&id) {
            return Err(StoreError::Backend(format!("write rejected for {id}")));
        }
        Ok(())
    }
}

/// An in-memory local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let data = StoreData {
            db_version: snapshot.db_version,
            records: snapshot.records.into_iter().map(|r| (r.id, r)).collect(),
            conflicts: snapshot
                .conflicts
                .into_iter()
                .map(|c| (c.record_id, c))
                .collect(),
            sync_state: snapshot.sync_state,
            failing: BTreeSet::new(),
        };
        Self {
            data: RwLock::new(data),
        }
    }

    /// Captures the current contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        let data = self.data.read();
        StoreSnapshot {
            db_version: data.db_version,
            records: data.records.values().cloned().collect(),
            conflicts: data.conflicts.values().cloned().collect(),
            sync_state: data.sync_state.clone(),
        }
    }

    /// Returns all records that are not pending tombstones.
    pub fn live_records(&self) -> Vec<Record> {
        self.data
            .read()
            .records
            .values()
            .filter(|r| !r.is_tombstone())
            .cloned()
            .collect()
    }

    /// Returns the number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.read().records.is_empty()
    }

    /// Makes every subsequent write of `id` fail with a backend error.
    pub fn fail_writes_for(&self, id: RecordId) {
        self.data.write().failing.insert(id);
    }
}

impl LocalStore for MemoryStore {
    fn get_node(&self, id: RecordId) -> StoreResult<Option<Record>> {
        Ok(self.data.read().records.get(&id).cloned())
    }

    fn get_node_by_source(&self, source: &str, source_id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .data
            .read()
            .records
            .values()
            .find(|r| {
                r.source.as_deref() == Some(source) && r.source_id.as_deref() == Some(source_id)
            })
            .cloned())
    }

    fn create_node(&self, mut record: Record) -> StoreResult<Record> {
        let mut data = self.data.write();
        data.check_writable(record.id)?;
        if data.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        data.stamp(&mut record);
        data.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_node(&self, mut record: Record) -> StoreResult<Record> {
        let mut data = self.data.write();
        data.check_writable(record.id)?;
        if !data.records.contains_key(&record.id) {
            return Err(StoreError::NotFound(record.id));
        }
        data.stamp(&mut record);
        data.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn delete_node(&self, id: RecordId) -> StoreResult<bool> {
        let mut data = self.data.write();
        data.check_writable(id)?;
        data.conflicts.remove(&id);
        Ok(data.records.remove(&id).is_some())
    }

    fn get_pending_changes(&self, since_version: u64) -> StoreResult<Vec<Record>> {
        let data = self.data.read();
        let mut pending: Vec<Record> = data
            .records
            .values()
            .filter(|r| r.crdt.db_version > since_version && r.has_local_changes())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.crdt.db_version);
        Ok(pending)
    }

    fn get_sync_state(&self) -> StoreResult<SyncState> {
        Ok(self.data.read().sync_state.clone())
    }

    fn update_sync_state(&self, state: &SyncState) -> StoreResult<()> {
        self.data.write().sync_state = state.clone();
        Ok(())
    }

    fn enqueue_conflict(&self, conflict: PendingConflict) -> StoreResult<()> {
        self.data.write().conflicts.insert(conflict.record_id, conflict);
        Ok(())
    }

    fn pending_conflicts(&self) -> StoreResult<Vec<PendingConflict>> {
        let mut conflicts: Vec<PendingConflict> =
            self.data.read().conflicts.values().cloned().collect();
        conflicts.sort_by_key(|c| c.detected_at);
        Ok(conflicts)
    }

    fn remove_conflict(&self, id: ConflictId) -> StoreResult<Option<PendingConflict>> {
        let mut data = self.data.write();
        let record_id = data
            .conflicts
            .values()
            .find(|c| c.id == id)
            .map(|c| c.record_id);
        Ok(record_id.and_then(|record_id| data.conflicts.remove(&record_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isosync_protocol::{ConflictType, SiteId, SyncConflict};

    fn record(name: &str) -> Record {
        Record::new(SiteId::new("site"), name, "body", 1_000)
    }

    fn queued(record: &Record, detected_at: i64) -> PendingConflict {
        let mut remote = record.clone();
        remote.set_name("remote", 2_000);
        let conflict = SyncConflict::new(
            record.clone(),
            remote,
            ConflictType::BothModified,
            detected_at,
        );
        PendingConflict::from_conflict(&conflict).unwrap()
    }

    #[test]
    fn create_get_update() {
        let store = MemoryStore::new();
        let created = store.create_node(record("a")).unwrap();
        assert_eq!(created.crdt.db_version, 1);

        let mut edited = store.get_node(created.id).unwrap().unwrap();
        edited.set_body("changed", 2_000);
        let updated = store.update_node(edited).unwrap();
        assert_eq!(updated.crdt.db_version, 2);
        assert_eq!(store.get_node(created.id).unwrap().unwrap().body, "changed");
    }

    #[test]
    fn duplicate_create_and_missing_update_fail() {
        let store = MemoryStore::new();
        let r = store.create_node(record("a")).unwrap();
        assert_eq!(store.create_node(r.clone()), Err(StoreError::AlreadyExists(r.id)));

        let other = record("b");
        assert_eq!(store.update_node(other.clone()), Err(StoreError::NotFound(other.id)));
    }

    #[test]
    fn lookup_by_source() {
        let store = MemoryStore::new();
        let r = store
            .create_node(record("imported").with_source("vault", "notes/a.md"))
            .unwrap();
        assert_eq!(
            store.get_node_by_source("vault", "notes/a.md").unwrap().map(|n| n.id),
            Some(r.id)
        );
        assert!(store.get_node_by_source("vault", "other.md").unwrap().is_none());
    }

    #[test]
    fn pending_changes_skip_synced_records() {
        let store = MemoryStore::new();
        let a = store.create_node(record("a")).unwrap();
        let mut b = store.create_node(record("b")).unwrap();
        b.mark_synced(1_000);
        store.update_node(b).unwrap();

        let pending = store.get_pending_changes(0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
        assert!(store.get_pending_changes(a.crdt.db_version).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_conflicts() {
        let store = MemoryStore::new();
        let r = store.create_node(record("a")).unwrap();
        store.enqueue_conflict(queued(&r, 5)).unwrap();
        assert_eq!(store.pending_conflicts().unwrap().len(), 1);

        assert!(store.delete_node(r.id).unwrap());
        assert!(store.pending_conflicts().unwrap().is_empty());
        assert!(!store.delete_node(r.id).unwrap());
    }

    #[test]
    fn enqueue_upserts_by_record() {
        let store = MemoryStore::new();
        let r = store.create_node(record("a")).unwrap();
        let first = queued(&r, 5);
        let second = queued(&r, 9);
        store.enqueue_conflict(first.clone()).unwrap();
        store.enqueue_conflict(second.clone()).unwrap();

        let conflicts = store.pending_conflicts().unwrap();
        assert_eq!(conflicts, vec![second.clone()]);
        assert_eq!(store.remove_conflict(first.id).unwrap(), None);
        assert_eq!(store.remove_conflict(second.id).unwrap(), Some(second));
    }

    #[test]
    fn snapshot_roundtrip_through_json() {
        let store = MemoryStore::new();
        let r = store.create_node(record("a")).unwrap();
        store.enqueue_conflict(queued(&r, 5)).unwrap();
        let mut state = store.get_sync_state().unwrap();
        state.record_failure("offline");
        store.update_sync_state(&state).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = MemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());

        let next = restored.create_node(record("b")).unwrap();
        assert_eq!(next.crdt.db_version, 2);
    }

    #[test]
    fn failing_writes() {
        let store = MemoryStore::new();
        let r = record("a");
        store.fail_writes_for(r.id);
        assert!(matches!(store.create_node(r), Err(StoreError::Backend(_))));
        assert!(store.is_empty());
    }
}
