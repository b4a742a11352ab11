//! Sync command implementation.

use crate::files::{self, ReplicaFile};
use crate::remote::ServerTransport;
use isosync_engine::{SyncCycleResult, SyncEngine, SystemClock};
use isosync_protocol::ConflictStrategy;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one sync.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SyncSummary {
    /// Local changes acknowledged by the remote.
    pub pushed: u64,
    /// Remote changes applied locally.
    pub pulled: u64,
    /// Records removed because the remote deleted them.
    pub deleted: u64,
    /// Remote changes that could not be applied.
    pub skipped: u64,
    /// Conflicts resolved by the strategy.
    pub resolved_conflicts: usize,
    /// Conflicts queued for `resolve`.
    pub queued_conflicts: usize,
    /// True if the whole remote was fetched.
    pub full_sync: bool,
}

impl From<&SyncCycleResult> for SyncSummary {
    fn from(result: &SyncCycleResult) -> Self {
        Self {
            pushed: result.pushed,
            pulled: result.pulled,
            deleted: result.deleted,
            skipped: result.skipped,
            resolved_conflicts: result.resolved_conflicts.len(),
            queued_conflicts: result.unresolved_conflicts.len(),
            full_sync: result.full_sync,
        }
    }
}

/// Runs the sync command.
pub fn run(
    path: &Path,
    remote: &Path,
    strategy: Option<ConflictStrategy>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = sync_replica(path, remote, strategy)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => {
            let mode = if summary.full_sync { "full" } else { "incremental" };
            println!(
                "Synced ({mode}): {} pushed, {} pulled, {} deleted",
                summary.pushed, summary.pulled, summary.deleted
            );
            if summary.skipped > 0 {
                println!("Skipped {} remote changes (see log)", summary.skipped);
            }
            if summary.resolved_conflicts > 0 {
                println!("Resolved {} conflicts", summary.resolved_conflicts);
            }
            if summary.queued_conflicts > 0 {
                println!(
                    "{} conflicts need attention; run `isosync conflicts`",
                    summary.queued_conflicts
                );
            }
        }
    }
    Ok(())
}

/// Syncs a replica file against a remote file and saves both.
///
/// The replica is saved even when the sync fails, so the failure is
/// recorded in its sync state.
pub fn sync_replica(
    path: &Path,
    remote: &Path,
    strategy: Option<ConflictStrategy>,
) -> Result<SyncSummary, Box<dyn std::error::Error>> {
    let mut replica = ReplicaFile::load(path)?;
    if let Some(strategy) = strategy {
        replica.strategy = strategy;
    }

    let server = Arc::new(files::load_remote(remote)?);
    let engine = SyncEngine::with_clock(
        replica.config.clone(),
        Arc::new(ServerTransport::new(Arc::clone(&server))),
        Arc::new(replica.open_store()),
        Arc::new(SystemClock),
    );
    engine.set_conflict_resolution_strategy(replica.strategy);

    let outcome = engine.sync_with_retry();

    replica.store = engine.store().snapshot();
    replica.save(path)?;
    files::save_remote(remote, &server)?;

    let result = outcome?.ok_or("a sync is already in progress")?;
    debug!(
        replica = %path.display(),
        remote = %remote.display(),
        "saved replica and remote"
    );
    Ok(SyncSummary::from(&result))
}
