//! Conflict resolver: applies the configured strategy and owns the manual queue.

use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use isosync_protocol::{
    ConflictId, ConflictResolution, ConflictStrategy, ConflictType, PendingConflict, Record,
    RecordId, SyncConflict,
};
use parking_lot::RwLock;
use tracing::{debug, info};

/// What happened to the local copy after a conflict was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The resolved record was written.
    Written(Record),
    /// The record was removed locally.
    Deleted,
    /// The conflict was queued for manual resolution.
    Queued,
}

/// Resolves conflicts with a configurable strategy.
#[derive(Debug)]
pub struct ConflictResolver {
    strategy: RwLock<ConflictStrategy>,
}

impl ConflictResolver {
    /// Creates a resolver using `strategy`.
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy: RwLock::new(strategy),
        }
    }

    /// Gets the strategy.
    pub fn strategy(&self) -> ConflictStrategy {
        *self.strategy.read()
    }

    /// Sets the strategy used for subsequently detected conflicts.
    pub fn set_strategy(&self, strategy: ConflictStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Resolves `conflict` with the current strategy and writes the result.
    pub fn handle<S: LocalStore + ?Sized>(
        &self,
        store: &S,
        conflict: &SyncConflict,
        now: i64,
    ) -> SyncResult<(ConflictResolution, ResolutionOutcome)> {
        let strategy = self.strategy();
        let resolution = strategy.resolve(conflict, now);

        let outcome = match &resolution.record {
            None => {
                store.enqueue_conflict(PendingConflict::from_conflict(conflict)?)?;
                refresh_conflict_count(store)?;
                info!(
                    record_id = %conflict.record_id(),
                    conflict_id = %conflict.id,
                    conflict_type = %conflict.conflict_type,
                    "conflict queued for manual resolution"
                );
                ResolutionOutcome::Queued
            }
            Some(record) => {
                let outcome = write_resolved(store, conflict.conflict_type, record.clone())?;
                drop_queued(store, conflict.record_id())?;
                outcome
            }
        };

        debug!(
            record_id = %conflict.record_id(),
            strategy = %strategy,
            conflict_type = %conflict.conflict_type,
            fields = ?conflict.conflicted_fields,
            "conflict handled"
        );
        Ok((resolution, outcome))
    }

    /// Returns all conflicts awaiting manual resolution, oldest first.
    pub fn pending_conflicts<S: LocalStore + ?Sized>(
        &self,
        store: &S,
    ) -> SyncResult<Vec<SyncConflict>> {
        store
            .pending_conflicts()?
            .iter()
            .map(|pending| pending.to_conflict().map_err(SyncError::from))
            .collect()
    }

    /// Applies a user's choice to a queued conflict and dequeues it.
    ///
    /// The chosen record gets a `sync_version` past both snapshots, is based
    /// on the remote revision, and is stamped as a local edit after its last
    /// sync, so the next cycle pushes it. Choosing the tombstone of a
    /// server-deleted conflict removes the record.
    pub fn resolve_manual<S: LocalStore + ?Sized>(
        &self,
        store: &S,
        id: ConflictId,
        chosen: Record,
        now: i64,
    ) -> SyncResult<Option<Record>> {
        let pending = store
            .pending_conflicts()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or(SyncError::ConflictNotFound(id))?;
        let conflict = pending.to_conflict()?;

        if chosen.id != conflict.record_id() {
            return Err(SyncError::InvalidResolution(format!(
                "record {} does not belong to conflict {id}",
                chosen.id
            )));
        }

        let mut record = chosen;
        record.sync_version = conflict
            .local
            .sync_version
            .max(conflict.remote.sync_version)
            .max(record.sync_version)
            + 1;
        record.base_version = conflict.remote_base();
        record.mark_resolved(now);

        let outcome = write_resolved(store, conflict.conflict_type, record)?;
        store.remove_conflict(id)?;
        refresh_conflict_count(store)?;

        info!(record_id = %conflict.record_id(), conflict_id = %id, "conflict resolved manually");
        Ok(match outcome {
            ResolutionOutcome::Written(record) => Some(record),
            ResolutionOutcome::Deleted | ResolutionOutcome::Queued => None,
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictStrategy::default())
    }
}

/// Writes a resolved record, creating it if the local copy is gone.
fn write_resolved<S: LocalStore + ?Sized>(
    store: &S,
    conflict_type: ConflictType,
    record: Record,
) -> SyncResult<ResolutionOutcome> {
    if record.is_tombstone() && conflict_type == ConflictType::ServerDeleted {
        store.delete_node(record.id)?;
        return Ok(ResolutionOutcome::Deleted);
    }

    let stored = match store.get_node(record.id)? {
        Some(_) => store.update_node(record)?,
        None => store.create_node(record)?,
    };
    Ok(ResolutionOutcome::Written(stored))
}

/// Removes conflicts queued earlier for a record that has now been resolved.
fn drop_queued<S: LocalStore + ?Sized>(store: &S, record_id: RecordId) -> SyncResult<()> {
    let stale: Vec<ConflictId> = store
        .pending_conflicts()?
        .into_iter()
        .filter(|c| c.record_id == record_id)
        .map(|c| c.id)
        .collect();
    if stale.is_empty() {
        return Ok(());
    }
    for id in stale {
        store.remove_conflict(id)?;
    }
    refresh_conflict_count(store)
}

/// Keeps `SyncState::conflict_count` equal to the queue length.
pub(crate) fn refresh_conflict_count<S: LocalStore + ?Sized>(store: &S) -> SyncResult<()> {
    let count = store.pending_conflicts()?.len() as u64;
    let mut state = store.get_sync_state()?;
    if state.conflict_count != count {
        state.conflict_count = count;
        store.update_sync_state(&state)?;
    }
    Ok(())
}
