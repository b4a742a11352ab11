//! Sync engine: one push-then-pull cycle at a time.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::live::{self, LiveHandle, SyncTrigger};
use crate::resolver::{ConflictResolver, ResolutionOutcome};
use crate::retry::BackoffController;
use crate::store::LocalStore;
use crate::transport::RemoteTransport;
use isosync_protocol::{
    detect_conflict, reconcile, ChangeToken, ConflictId, ConflictStrategy, ConflictType,
    Reconciliation, Record, RecordId, SyncConflict, SyncState,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The current phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is pushing local changes to the remote.
    Pushing,
    /// Engine is pulling changes from the remote.
    Pulling,
    /// Engine has completed a sync cycle.
    Synced,
    /// The last cycle failed.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncPhase {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Pushing | SyncPhase::Pulling)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Calls to `sync` that found a cycle already in flight.
    pub cycles_skipped: u64,
    /// Total number of records pushed.
    pub records_pushed: u64,
    /// Total number of records pulled.
    pub records_pulled: u64,
    /// Total number of records deleted by remote deletions.
    pub records_deleted: u64,
    /// Total number of conflicts encountered.
    pub conflicts_encountered: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Records acknowledged by the remote (saves and deletions).
    pub pushed: u64,
    /// Remote records created or applied locally.
    pub pulled: u64,
    /// Local records removed because the remote deleted them.
    pub deleted: u64,
    /// Remote changes that failed to apply and were skipped.
    pub skipped: u64,
    /// Conflicts that were resolved automatically, with both snapshots.
    pub resolved_conflicts: Vec<SyncConflict>,
    /// Conflicts queued for manual resolution.
    pub unresolved_conflicts: Vec<SyncConflict>,
    /// True if the cycle fetched from the start of the change feed.
    pub full_sync: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// Releases the in-flight latch when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Engine state shared with the live sync task.
pub(crate) struct EngineInner<T: RemoteTransport, S: LocalStore> {
    config: RwLock<SyncConfig>,
    transport: Arc<T>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    resolver: ConflictResolver,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    in_flight: AtomicBool,
    zone_ready: AtomicBool,
}

/// The sync engine keeps a local store consistent with a remote.
///
/// # Cycle
///
/// 1. Push records with unsynced local edits (tombstones as deletions)
/// 2. Pull remote changes since the stored continuation token
/// 3. Persist the new token and sync state
///
/// Only step 3 advances sync progress, so a cycle that fails earlier can be
/// repeated from the same token.
pub struct SyncEngine<T: RemoteTransport, S: LocalStore> {
    inner: Arc<EngineInner<T, S>>,
    live: Mutex<Option<LiveHandle>>,
}

impl<T: RemoteTransport, S: LocalStore> SyncEngine<T, S> {
    /// Creates a new sync engine using the system clock.
    pub fn new(config: SyncConfig, transport: T, store: S) -> Self {
        Self::with_clock(config, Arc::new(transport), Arc::new(store), Arc::new(SystemClock))
    }

    /// Creates a new sync engine with shared collaborators and a custom clock.
    pub fn with_clock(
        config: SyncConfig,
        transport: Arc<T>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(config),
                transport,
                store,
                clock,
                resolver: ConflictResolver::default(),
                phase: RwLock::new(SyncPhase::Idle),
                stats: RwLock::new(SyncStats::default()),
                cancelled: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                zone_ready: AtomicBool::new(false),
            }),
            live: Mutex::new(None),
        }
    }

    /// Gets the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.inner.phase.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> SyncConfig {
        self.inner.config.read().clone()
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Returns the remote transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Reads the persisted sync state.
    pub fn sync_state(&self) -> SyncResult<SyncState> {
        Ok(self.inner.store.get_sync_state()?)
    }

    /// Sets the strategy used for subsequently detected conflicts.
    pub fn set_conflict_resolution_strategy(&self, strategy: ConflictStrategy) {
        info!(strategy = %strategy, "conflict resolution strategy changed");
        self.inner.resolver.set_strategy(strategy);
    }

    /// Gets the conflict resolution strategy.
    pub fn conflict_resolution_strategy(&self) -> ConflictStrategy {
        self.inner.resolver.strategy()
    }

    /// Returns conflicts awaiting manual resolution, oldest first.
    pub fn pending_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        self.inner.resolver.pending_conflicts(self.inner.store.as_ref())
    }

    /// Resolves a queued conflict with the caller's chosen record.
    ///
    /// The chosen record is written locally and pushed by the next cycle.
    /// Returns `None` if the choice deleted the record.
    pub fn resolve_conflict(&self, id: ConflictId, chosen: Record) -> SyncResult<Option<Record>> {
        let now = self.inner.clock.now_ms();
        self.inner
            .resolver
            .resolve_manual(self.inner.store.as_ref(), id, chosen, now)
    }

    /// Cancels any ongoing sync operation.
    ///
    /// The flag stays set, and every later cycle returns
    /// [`SyncError::Cancelled`], until [`reset_cancel`](Self::reset_cancel).
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.inner.reset_cancel();
    }

    /// Returns true if a cycle is currently in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Performs one sync cycle: push then pull.
    ///
    /// Returns `Ok(None)` without doing anything if a cycle is already in
    /// flight. Failures are recorded in the sync state before being
    /// returned; this method never retries.
    pub fn sync(&self) -> SyncResult<Option<SyncCycleResult>> {
        self.inner.sync()
    }

    /// Performs a sync with retry on transient errors.
    ///
    /// Blocks the calling thread between attempts.
    pub fn sync_with_retry(&self) -> SyncResult<Option<SyncCycleResult>> {
        let config = self.config();
        let max_attempts = config.max_retry_attempts.max(1);
        let mut backoff = BackoffController::new(config.retry);

        let mut attempt = 1;
        loop {
            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_delay(&e);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync failed; retrying"
                    );
                    self.inner.set_phase(SyncPhase::RetryWait);
                    std::thread::sleep(delay);
                    self.inner.stats.write().retries += 1;
                    self.inner.check_cancelled()?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: RemoteTransport + 'static, S: LocalStore + 'static> SyncEngine<T, S> {
    /// Starts background sync on the current tokio runtime.
    ///
    /// Does nothing if `config.is_enabled` is false or live sync is already
    /// running.
    pub fn start_live_sync(&self, config: SyncConfig) -> SyncResult<()> {
        if !config.is_enabled {
            info!("live sync disabled by configuration");
            return Ok(());
        }

        let mut live = self.live.lock();
        if live.is_some() {
            debug!("live sync already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        *self.inner.config.write() = config.clone();
        *live = Some(live::spawn(&runtime, Arc::clone(&self.inner), config));
        Ok(())
    }

    /// Stops background sync and waits for the task to finish.
    ///
    /// A cycle in flight is cancelled at its next cancellation check.
    pub async fn stop_live_sync(&self) {
        let handle = self.live.lock().take();
        let Some(handle) = handle else {
            return;
        };
        self.inner.cancel();
        handle.stop().await;
        self.inner.reset_cancel();
    }

    /// Asks the live task to run a cycle soon.
    ///
    /// Requests arriving while a cycle is queued are coalesced into it.
    /// Returns false if live sync is not running.
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        match self.live.lock().as_ref() {
            Some(handle) => handle.request(trigger),
            None => false,
        }
    }

    /// Returns true if background sync is running.
    pub fn is_live(&self) -> bool {
        self.live
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<T: RemoteTransport, S: LocalStore> EngineInner<T, S> {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    pub(crate) fn sync(&self) -> SyncResult<Option<SyncCycleResult>> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("sync already in flight; skipping");
            self.stats.write().cycles_skipped += 1;
            return Ok(None);
        };

        let start = Instant::now();
        info!("sync cycle started");

        match self.run_cycle() {
            Ok(mut result) => {
                result.duration = start.elapsed();
                self.set_phase(SyncPhase::Synced);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.records_pushed += result.pushed;
                    stats.records_pulled += result.pulled;
                    stats.records_deleted += result.deleted;
                    stats.conflicts_encountered += (result.resolved_conflicts.len()
                        + result.unresolved_conflicts.len())
                        as u64;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    pushed = result.pushed,
                    pulled = result.pulled,
                    deleted = result.deleted,
                    skipped = result.skipped,
                    conflicts = result.resolved_conflicts.len(),
                    queued = result.unresolved_conflicts.len(),
                    full_sync = result.full_sync,
                    duration_ms = result.duration.as_millis() as u64,
                    "sync cycle finished"
                );
                Ok(Some(result))
            }
            Err(SyncError::Cancelled) => {
                self.set_phase(SyncPhase::Idle);
                info!("sync cycle cancelled");
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        self.check_cancelled()?;
        let now = self.clock.now_ms();
        let mut result = SyncCycleResult::default();

        self.ensure_zone()?;

        self.set_phase(SyncPhase::Pushing);
        self.push_all(now, &mut result)?;
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Pulling);
        let token = self.pull_all(now, &mut result)?;
        self.check_cancelled()?;

        let mut state = self.store.get_sync_state()?;
        state.record_success(token, self.clock.now_ms());
        state.pending_change_count = self.store.get_pending_changes(0)?.len() as u64;
        state.conflict_count = self.store.pending_conflicts()?.len() as u64;
        self.store.update_sync_state(&state)?;

        Ok(result)
    }

    /// Creates the zone and subscription once per engine (or after the
    /// remote reported the zone missing).
    fn ensure_zone(&self) -> SyncResult<()> {
        if self.zone_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.save_zone()?;
        self.check_cancelled()?;
        self.transport.subscribe_to_changes()?;
        self.check_cancelled()?;
        self.zone_ready.store(true, Ordering::SeqCst);
        debug!("zone and subscription ready");
        Ok(())
    }

    fn push_all(&self, now: i64, result: &mut SyncCycleResult) -> SyncResult<()> {
        let held: HashSet<RecordId> = self
            .store
            .pending_conflicts()?
            .into_iter()
            .map(|c| c.record_id)
            .collect();
        let (tombstones, records): (Vec<Record>, Vec<Record>) = self
            .store
            .get_pending_changes(0)?
            .into_iter()
            .filter(|r| !held.contains(&r.id))
            .partition(|r| r.is_tombstone());

        if records.is_empty() && tombstones.is_empty() {
            return Ok(());
        }
        debug!(
            records = records.len(),
            tombstones = tombstones.len(),
            held = held.len(),
            "pushing local changes"
        );

        let batch_size = self.config.read().effective_batch_size();

        for chunk in records.chunks(batch_size) {
            self.check_cancelled()?;
            let outcomes = self.transport.save(chunk)?;
            self.check_cancelled()?;

            for outcome in outcomes {
                let Some(pushed) = chunk.iter().find(|r| r.id == outcome.id) else {
                    warn!(record_id = %outcome.id, "remote acknowledged a record that was not sent");
                    continue;
                };
                match outcome.result {
                    Ok(acked) => {
                        self.adopt_ack(pushed, &acked, now)?;
                        result.pushed += 1;
                    }
                    Err(TransportError::ConflictDetected { server }) => {
                        self.push_conflict(pushed, *server, now, result)?;
                    }
                    Err(e) => {
                        error!(record_id = %outcome.id, error = %e, "save rejected; aborting push");
                        return Err(e.into());
                    }
                }
            }
        }

        for chunk in tombstones.chunks(batch_size) {
            self.check_cancelled()?;
            let ids: Vec<RecordId> = chunk.iter().map(|r| r.id).collect();
            let outcomes = self.transport.delete(&ids)?;
            self.check_cancelled()?;

            for outcome in outcomes {
                match outcome.result {
                    Ok(()) | Err(TransportError::RecordNotFound) => {
                        self.store.delete_node(outcome.id)?;
                        debug!(record_id = %outcome.id, "deletion acknowledged");
                        result.pushed += 1;
                    }
                    Err(TransportError::ConflictDetected { server }) => {
                        let Some(pushed) = chunk.iter().find(|r| r.id == outcome.id) else {
                            continue;
                        };
                        self.push_conflict(pushed, *server, now, result)?;
                    }
                    Err(e) => {
                        error!(record_id = %outcome.id, error = %e, "delete rejected; aborting push");
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(())
    }

    /// Stamps a pushed record as synced with the remote's sync version.
    fn adopt_ack(&self, pushed: &Record, acked: &Record, now: i64) -> SyncResult<()> {
        let Some(mut current) = self.store.get_node(pushed.id)? else {
            return Ok(());
        };
        current.sync_version = current.sync_version.max(acked.sync_version);
        // An edit made while the save was in flight stays pending.
        if current.modified_at <= pushed.modified_at {
            current.mark_synced(now);
        }
        current.base_version = acked.sync_version;
        self.store.update_node(current)?;
        debug!(record_id = %pushed.id, sync_version = acked.sync_version, "save acknowledged");
        Ok(())
    }

    fn push_conflict(
        &self,
        local: &Record,
        server: Record,
        now: i64,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        if local.same_content(&server) {
            return self.adopt_in_sync(local.clone(), &server, now);
        }
        let conflict = detect_conflict(local, &server, now).unwrap_or_else(|| {
            let conflict_type = if local.is_tombstone() {
                ConflictType::LocalDeleted
            } else {
                ConflictType::BothModified
            };
            SyncConflict::new(local.clone(), server, conflict_type, now)
        });
        self.handle_conflict(conflict, now, result)
    }

    fn pull_all(&self, now: i64, result: &mut SyncCycleResult) -> SyncResult<Option<ChangeToken>> {
        let (batch_size, threshold_ms) = {
            let config = self.config.read();
            (config.effective_batch_size(), config.incremental_threshold_ms())
        };
        let state = self.store.get_sync_state()?;
        let incremental = state.allows_incremental(now, threshold_ms);
        result.full_sync = !incremental;

        let mut token = if incremental {
            state.last_sync_token
        } else {
            None
        };
        debug!(incremental, token = ?token, "pulling remote changes");

        loop {
            self.check_cancelled()?;
            let batch = self.transport.fetch_changes(token.as_ref(), batch_size)?;
            self.check_cancelled()?;

            for remote in batch.changed {
                let id = remote.id;
                if let Err(e) = self.apply_remote(remote, now, result) {
                    warn!(record_id = %id, error = %e, "skipping remote change");
                    result.skipped += 1;
                }
            }
            for id in batch.deleted_ids {
                if let Err(e) = self.apply_remote_deletion(id, now, result) {
                    warn!(record_id = %id, error = %e, "skipping remote deletion");
                    result.skipped += 1;
                }
            }

            let advanced = batch.new_token.is_some() && batch.new_token != token;
            if batch.new_token.is_some() {
                token = batch.new_token;
            }
            if !batch.has_more {
                break;
            }
            if !advanced {
                warn!("remote reported more changes without advancing the token");
                break;
            }
        }

        Ok(token)
    }

    fn apply_remote(&self, remote: Record, now: i64, result: &mut SyncCycleResult) -> SyncResult<()> {
        let Some(local) = self.store.get_node(remote.id)? else {
            if remote.is_tombstone() {
                return Ok(());
            }
            let mut record = remote;
            record.mark_synced(now);
            debug!(record_id = %record.id, "creating record from remote");
            self.store.create_node(record)?;
            result.pulled += 1;
            return Ok(());
        };

        match reconcile(&local, &remote, now) {
            Reconciliation::ApplyRemote => {
                let mut record = remote;
                record.mark_synced(now);
                record.sync_version = record.sync_version.max(local.sync_version);
                debug!(record_id = %record.id, sync_version = record.sync_version, "applying remote record");
                self.store.update_node(record)?;
                result.pulled += 1;
            }
            Reconciliation::KeepLocal => {
                debug!(record_id = %local.id, "local copy is current");
            }
            Reconciliation::InSync => self.adopt_in_sync(local, &remote, now)?,
            Reconciliation::Conflict(conflict) => self.handle_conflict(conflict, now, result)?,
        }
        Ok(())
    }

    fn apply_remote_deletion(
        &self,
        id: RecordId,
        now: i64,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let Some(local) = self.store.get_node(id)? else {
            return Ok(());
        };
        if local.has_local_changes() && !local.is_tombstone() {
            let conflict = SyncConflict::server_deleted(local, now);
            return self.handle_conflict(conflict, now, result);
        }
        if self.store.delete_node(id)? {
            debug!(record_id = %id, "deleting record removed on remote");
            result.deleted += 1;
        }
        Ok(())
    }

    /// Identical content on both sides: adopt the higher sync version and
    /// rebase on the remote revision.
    fn adopt_in_sync(&self, mut local: Record, remote: &Record, now: i64) -> SyncResult<()> {
        let base = local.base_version.max(remote.sync_version);
        local.sync_version = local.sync_version.max(remote.sync_version);
        local.mark_synced(now);
        local.base_version = base;
        debug!(record_id = %local.id, "content identical; marking synced");
        self.store.update_node(local)?;
        Ok(())
    }

    fn handle_conflict(
        &self,
        conflict: SyncConflict,
        now: i64,
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let (_, outcome) = self
            .resolver
            .handle(self.store.as_ref(), &conflict, now)?;
        match outcome {
            ResolutionOutcome::Queued => result.unresolved_conflicts.push(conflict),
            ResolutionOutcome::Written(_) | ResolutionOutcome::Deleted => {
                result.resolved_conflicts.push(conflict)
            }
        }
        Ok(())
    }

    /// Records a failed cycle in the phase, stats and persisted state.
    fn handle_error(&self, error: &SyncError) {
        self.set_phase(SyncPhase::Error);
        self.stats.write().last_error = Some(error.to_string());

        if matches!(error, SyncError::Transport(TransportError::ZoneNotFound)) {
            // The remote lost the zone; recreate it and refetch everything.
            self.zone_ready.store(false, Ordering::SeqCst);
        }

        let persisted = self.store.get_sync_state().and_then(|mut state| {
            if matches!(error, SyncError::Transport(TransportError::ZoneNotFound)) {
                state.last_sync_token = None;
            }
            state.record_failure(error.to_string());
            self.store.update_sync_state(&state)
        });
        if let Err(e) = persisted {
            error!(error = %e, "failed to record sync failure");
        }

        if error.is_retryable() {
            warn!(error = %error, kind = "retryable", "sync cycle failed");
        } else {
            error!(error = %error, "sync cycle failed");
        }
    }
}
