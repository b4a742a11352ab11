//! Integration tests for sync engine and server.

use isosync_engine::{
    Clock, DeleteOutcome, LocalStore, ManualClock, MemoryStore, RemoteTransport, SaveOutcome,
    SyncConfig, SyncEngine, SyncError, TransportError,
};
use isosync_protocol::{
    ChangeBatch, ChangeToken, ConflictStrategy, ConflictType, Record, RecordId, SiteId,
};
use isosync_server::{ServerConfig, ServerError, SyncServer};
use isosync_testkit::T0;
use std::sync::Arc;
use std::time::Duration;

/// A transport that connects to an in-memory server.
struct InMemoryTransport {
    server: Arc<SyncServer>,
}

impl InMemoryTransport {
    fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

fn map_error(error: ServerError) -> TransportError {
    match error {
        ServerError::NotAuthenticated => TransportError::NotAuthenticated,
        ServerError::ZoneNotFound | ServerError::InvalidToken => TransportError::ZoneNotFound,
        ServerError::RecordNotFound(_) => TransportError::RecordNotFound,
        ServerError::QuotaExceeded(_) => TransportError::QuotaExceeded,
        ServerError::Conflict { server } => TransportError::ConflictDetected { server },
        ServerError::Unavailable => TransportError::NetworkUnavailable,
        ServerError::Throttled(secs) => TransportError::RetryLater(secs.map(Duration::from_secs)),
        other => TransportError::ServerError(other.to_string()),
    }
}

impl RemoteTransport for InMemoryTransport {
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

/// One device: an engine over its own store, sharing the server and clock.
struct Replica {
    site: SiteId,
    engine: SyncEngine<InMemoryTransport, MemoryStore>,
    clock: Arc<ManualClock>,
}

impl Replica {
    fn new(site: &str, server: &Arc<SyncServer>, clock: &Arc<ManualClock>) -> Self {
        Self::with_config(site, server, clock, SyncConfig::default())
    }

    fn with_config(
        site: &str,
        server: &Arc<SyncServer>,
        clock: &Arc<ManualClock>,
        config: SyncConfig,
    ) -> Self {
        let engine = SyncEngine::with_clock(
            config,
            Arc::new(InMemoryTransport::new(Arc::clone(server))),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        );
        Self {
            site: SiteId::new(site),
            engine,
            clock: Arc::clone(clock),
        }
    }

    fn tick(&self) -> i64 {
        self.clock.advance(1_000);
        self.clock.now_ms()
    }

    fn create(&self, name: &str, body: &str) -> Record {
        let now = self.tick();
        let record = Record::new(self.site.clone(), name, body, now);
        self.engine.store().create_node(record).unwrap()
    }

    fn edit(&self, id: RecordId, edit: impl FnOnce(&mut Record, i64)) -> Record {
        let now = self.tick();
        let mut record = self.get(id).expect("record exists");
        record.crdt.site_id = self.site.clone();
        edit(&mut record, now);
        self.engine.store().update_node(record).unwrap()
    }

    fn delete(&self, id: RecordId) {
        let now = self.tick();
        let mut record = self.get(id).expect("record exists");
        record.tombstone(now);
        self.engine.store().update_node(record).unwrap();
    }

    fn get(&self, id: RecordId) -> Option<Record> {
        self.engine.store().get_node(id).unwrap()
    }

    fn sync(&self) -> isosync_engine::SyncCycleResult {
        self.clock.advance(10);
        self.engine.sync().unwrap().expect("cycle ran")
    }

    fn bodies(&self) -> Vec<(RecordId, String)> {
        let mut bodies: Vec<_> = self
            .engine
            .store()
            .live_records()
            .into_iter()
            .map(|r| (r.id, r.body))
            .collect();
        bodies.sort();
        bodies
    }
}

fn setup() -> (Arc<SyncServer>, Arc<ManualClock>) {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let clock = Arc::new(ManualClock::new(T0));
    (server, clock)
}

/// Runs rounds of sync on every replica until nothing changes.
fn settle(replicas: &[&Replica]) {
    for _ in 0..4 {
        for replica in replicas {
            replica.sync();
        }
    }
}

#[test]
fn test_basic_sync_flow() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let record = a.create("notes", "hello");
    let result = a.sync();
    assert_eq!(result.pushed, 1);
    assert!(result.full_sync);
    assert!(server.has_zone());
    assert_eq!(server.record(record.id).unwrap().sync_version, 1);

    let pushed = a.get(record.id).unwrap();
    assert!(!pushed.has_local_changes());
    assert_eq!(pushed.sync_version, 1);

    let result = b.sync();
    assert_eq!(result.pulled, 1);
    let pulled = b.get(record.id).unwrap();
    assert_eq!(pulled.body, "hello");
    assert!(!pulled.has_local_changes());
}

#[test]
fn test_edits_propagate_both_ways() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let first = a.create("first", "from a");
    a.sync();
    b.sync();

    let second = b.create("second", "from b");
    b.edit(first.id, |r, now| {
        r.add_tag("seen", now);
    });
    b.sync();
    a.sync();

    assert!(a.get(first.id).unwrap().tags.contains("seen"));
    assert_eq!(a.get(second.id).unwrap().body, "from b");
    assert_eq!(a.bodies(), b.bodies());
}

#[test]
fn test_resync_is_idempotent() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    a.create("one", "1");
    a.create("two", "2");
    a.sync();
    b.sync();
    let before = b.bodies();

    let again = b.sync();
    assert_eq!(again.pulled, 0);
    assert_eq!(again.pushed, 0);
    assert!(!again.full_sync);
    assert_eq!(b.bodies(), before);

    // A full resync from scratch applies nothing new either.
    let mut state = b.engine.sync_state().unwrap();
    state.last_sync_token = None;
    b.engine.store().update_sync_state(&state).unwrap();
    let full = b.sync();
    assert!(full.full_sync);
    assert_eq!(full.pulled, 0);
    assert_eq!(b.bodies(), before);
}

#[test]
fn test_paged_push_and_pull() {
    let (server, clock) = setup();
    let config = SyncConfig::default().with_batch_size(2);
    let a = Replica::with_config("a", &server, &clock, config.clone());
    let b = Replica::with_config("b", &server, &clock, config);

    for i in 0..5 {
        a.create(&format!("record-{i}"), &format!("body {i}"));
    }
    assert_eq!(a.sync().pushed, 5);
    assert_eq!(server.record_count(), 5);

    let result = b.sync();
    assert_eq!(result.pulled, 5);
    assert_eq!(a.bodies(), b.bodies());

    let token = b.engine.sync_state().unwrap().last_sync_token.unwrap();
    assert_eq!(token.sequence(), Some(server.latest_sequence()));
}

#[test]
fn test_deletion_propagates() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let record = a.create("doomed", "bye");
    a.sync();
    b.sync();

    a.delete(record.id);
    assert_eq!(a.sync().pushed, 1);
    assert!(a.get(record.id).is_none());
    assert!(server.record(record.id).is_none());

    let result = b.sync();
    assert_eq!(result.deleted, 1);
    assert!(b.get(record.id).is_none());
}

#[test]
fn test_concurrent_edits_latest_wins() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    a.edit(record.id, |r, now| r.set_body("from a", now));
    b.edit(record.id, |r, now| r.set_body("from b", now));

    b.sync();
    let result = a.sync();
    assert_eq!(result.resolved_conflicts.len(), 1);
    assert!(result.unresolved_conflicts.is_empty());

    settle(&[&a, &b]);
    assert_eq!(a.get(record.id).unwrap().body, "from b");
    assert_eq!(a.bodies(), b.bodies());
    assert!(!a.get(record.id).unwrap().has_local_changes());
}

#[test]
fn test_edit_after_losing_conflict_does_not_overwrite_newer_remote() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    a.edit(record.id, |r, now| r.set_body("from a", now));
    b.edit(record.id, |r, now| r.set_body("from b", now));
    b.sync();
    a.sync();

    // A took B's revision and is based on what the server holds.
    let resolved = a.get(record.id).unwrap();
    let stored = server.record(record.id).unwrap();
    assert_eq!(resolved.body, "from b");
    assert!(!resolved.has_local_changes());
    assert_eq!(resolved.base_version, stored.sync_version);

    a.engine.set_conflict_resolution_strategy(ConflictStrategy::Manual);
    b.edit(record.id, |r, now| r.set_body("b second", now));
    b.sync();
    a.edit(record.id, |r, now| r.set_body("a second", now));
    let result = a.sync();

    assert_eq!(result.pushed, 0);
    assert_eq!(result.unresolved_conflicts.len(), 1);
    assert_eq!(server.record(record.id).unwrap().body, "b second");
    let pending = a.engine.pending_conflicts().unwrap();
    assert_eq!(pending[0].local.body, "a second");
    assert_eq!(pending[0].remote.body, "b second");
}

#[test]
fn test_conflict_is_resolved_once_per_remote_revision() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    a.engine
        .set_conflict_resolution_strategy(ConflictStrategy::LocalWins);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    b.edit(record.id, |r, now| r.set_body("from b", now));
    b.sync();
    a.edit(record.id, |r, now| r.set_body("from a", now));

    // The push meets B's revision, then the pull delivers it again.
    let result = a.sync();
    assert_eq!(result.resolved_conflicts.len(), 1);
    let once = a.get(record.id).unwrap();
    assert_eq!(once.sync_version, 3);
    assert_eq!(once.base_version, 2);
    assert!(once.has_local_changes());

    // The kept edit is pushed against B's revision on the next cycle.
    let mut state = a.engine.sync_state().unwrap();
    state.last_sync_token = None;
    a.engine.store().update_sync_state(&state).unwrap();
    let result = a.sync();
    assert!(result.full_sync);
    assert!(result.resolved_conflicts.is_empty());
    assert_eq!(result.pushed, 1);
    assert_eq!(server.record(record.id).unwrap().body, "from a");
}

#[test]
fn test_concurrent_edits_local_wins() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    a.engine
        .set_conflict_resolution_strategy(ConflictStrategy::LocalWins);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    b.edit(record.id, |r, now| r.set_body("from b", now));
    b.sync();
    a.edit(record.id, |r, now| r.set_body("from a", now));
    a.sync();

    settle(&[&a, &b]);
    assert_eq!(b.get(record.id).unwrap().body, "from a");
    assert_eq!(a.bodies(), b.bodies());
}

#[test]
fn test_field_level_merge_combines_tags() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    a.engine.set_conflict_resolution_strategy(ConflictStrategy::FieldLevelMerge);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    b.edit(record.id, |r, now| {
        r.add_tag("from-b", now);
    });
    b.sync();
    a.edit(record.id, |r, now| {
        r.add_tag("from-a", now);
    });
    a.sync();

    settle(&[&a, &b]);
    let merged = b.get(record.id).unwrap();
    assert!(merged.tags.contains("from-a"));
    assert!(merged.tags.contains("from-b"));
    assert_eq!(a.get(record.id).unwrap().tags, merged.tags);
}

#[test]
fn test_manual_conflict_resolution() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    a.engine.set_conflict_resolution_strategy(ConflictStrategy::Manual);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    b.edit(record.id, |r, now| r.set_body("from b", now));
    b.sync();
    a.edit(record.id, |r, now| r.set_body("from a", now));
    let result = a.sync();
    assert!(!result.unresolved_conflicts.is_empty());

    // Nothing is written or pushed while the conflict waits.
    assert_eq!(a.get(record.id).unwrap().body, "from a");
    assert_eq!(server.record(record.id).unwrap().body, "from b");
    a.sync();
    assert_eq!(server.record(record.id).unwrap().body, "from b");

    let pending = a.engine.pending_conflicts().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(a.engine.sync_state().unwrap().conflict_count, 1);

    let conflict = &pending[0];
    let mut chosen = conflict.local.clone();
    chosen.body = "hand merged".to_string();
    a.engine.resolve_conflict(conflict.id, chosen).unwrap();
    assert!(a.engine.pending_conflicts().unwrap().is_empty());

    settle(&[&a, &b]);
    assert_eq!(server.record(record.id).unwrap().body, "hand merged");
    assert_eq!(b.get(record.id).unwrap().body, "hand merged");
    assert_eq!(a.engine.sync_state().unwrap().conflict_count, 0);
}

#[test]
fn test_edit_resurrects_remotely_deleted_record() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);

    let record = a.create("doomed", "base");
    a.sync();
    b.sync();

    a.delete(record.id);
    a.sync();
    b.edit(record.id, |r, now| r.set_body("still needed", now));
    let result = b.sync();

    assert_eq!(result.pushed, 1);
    assert!(result.resolved_conflicts.is_empty());
    assert_eq!(server.record(record.id).unwrap().body, "still needed");

    a.sync();
    assert_eq!(a.get(record.id).unwrap().body, "still needed");
}

#[test]
fn test_remote_deletion_of_held_record() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    b.engine.set_conflict_resolution_strategy(ConflictStrategy::Manual);

    let record = a.create("shared", "base");
    a.sync();
    b.sync();

    a.edit(record.id, |r, now| r.set_body("from a", now));
    b.edit(record.id, |r, now| r.set_body("from b", now));
    a.sync();
    b.sync();
    assert_eq!(b.engine.pending_conflicts().unwrap().len(), 1);

    a.delete(record.id);
    a.sync();
    b.sync();

    let pending = b.engine.pending_conflicts().unwrap();
    assert_eq!(pending.len(), 1);
    let conflict = &pending[0];
    assert_eq!(conflict.conflict_type, ConflictType::ServerDeleted);
    assert!(conflict.remote.is_tombstone());

    let kept = b.engine.resolve_conflict(conflict.id, conflict.remote.clone()).unwrap();
    assert!(kept.is_none());
    assert!(b.get(record.id).is_none());
    assert!(b.engine.pending_conflicts().unwrap().is_empty());
}

#[test]
fn test_transient_failure_is_recorded_then_cleared() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    a.create("notes", "hello");
    a.sync();

    server.fail_next(ServerError::Unavailable);
    let err = a.engine.sync().unwrap_err();
    assert!(err.is_retryable());
    let state = a.engine.sync_state().unwrap();
    assert_eq!(state.consecutive_failures, 1);
    assert!(state.last_error.is_some());

    a.sync();
    let state = a.engine.sync_state().unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());
}

#[test]
fn test_lost_zone_triggers_full_resync() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    a.create("notes", "hello");
    a.sync();
    assert!(a.engine.sync_state().unwrap().last_sync_token.is_some());

    server.delete_zone();
    let err = a.engine.sync().unwrap_err();
    assert_eq!(err, SyncError::Transport(TransportError::ZoneNotFound));
    assert!(a.engine.sync_state().unwrap().last_sync_token.is_none());

    let result = a.sync();
    assert!(result.full_sync);
    assert!(server.has_zone());
}

#[test]
fn test_throttling_carries_retry_after() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    a.sync();

    server.fail_next(ServerError::Throttled(Some(7)));
    let err = a.engine.sync().unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[test]
fn test_quota_exceeded_is_terminal() {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_record_quota(1),
    ));
    let clock = Arc::new(ManualClock::new(T0));
    let a = Replica::new("a", &server, &clock);

    a.create("one", "1");
    a.sync();
    a.create("two", "2");
    let err = a.engine.sync().unwrap_err();
    assert_eq!(err, SyncError::Transport(TransportError::QuotaExceeded));
    assert!(!err.is_retryable());
    assert_eq!(server.record_count(), 1);
}

#[test]
fn test_three_replicas_converge() {
    let (server, clock) = setup();
    let a = Replica::new("a", &server, &clock);
    let b = Replica::new("b", &server, &clock);
    let c = Replica::new("c", &server, &clock);

    let shared = a.create("shared", "base");
    a.sync();
    b.sync();
    c.sync();

    a.edit(shared.id, |r, now| r.set_name("renamed", now));
    b.edit(shared.id, |r, now| r.set_body("rewritten", now));
    let gone = c.create("temp", "temp");
    c.sync();
    c.delete(gone.id);
    c.create("kept", "kept");

    settle(&[&a, &b, &c]);
    assert_eq!(a.bodies(), b.bodies());
    assert_eq!(b.bodies(), c.bodies());
    assert!(a.get(gone.id).is_none());
    for replica in [&a, &b, &c] {
        assert!(replica.engine.store().get_pending_changes(0).unwrap().is_empty());
    }
}
