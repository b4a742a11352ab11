//! Status command implementation.

use crate::files::ReplicaFile;
use isosync_engine::LocalStore;
use serde::Serialize;
use std::path::Path;

/// Replica status.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Site ID.
    pub site: String,
    /// Conflict strategy.
    pub strategy: String,
    /// Live records.
    pub record_count: usize,
    /// Records (including deletions) waiting to be pushed.
    pub pending_changes: usize,
    /// Conflicts waiting for `resolve`.
    pub pending_conflicts: usize,
    /// Hex form of the stored continuation token.
    pub last_sync_token: Option<String>,
    /// Completion time of the last successful sync (unix ms).
    pub last_sync_at: Option<i64>,
    /// Failed syncs since the last success.
    pub consecutive_failures: u32,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = status(&ReplicaFile::load(path)?)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Computes the status of a replica.
pub fn status(replica: &ReplicaFile) -> Result<StatusResult, Box<dyn std::error::Error>> {
    let store = replica.open_store();
    let state = store.get_sync_state()?;

    Ok(StatusResult {
        site: replica.site.clone(),
        strategy: replica.strategy.to_string(),
        record_count: store.live_records().len(),
        pending_changes: store.get_pending_changes(0)?.len(),
        pending_conflicts: store.pending_conflicts()?.len(),
        last_sync_token: state
            .last_sync_token
            .map(|token| token.as_bytes().iter().map(|b| format!("{b:02x}")).collect()),
        last_sync_at: state.last_sync_at,
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error,
    })
}

fn print_text_output(result: &StatusResult) {
    println!("Replica:            {}", result.site);
    println!("Strategy:           {}", result.strategy);
    println!("Records:            {}", result.record_count);
    println!("Pending changes:    {}", result.pending_changes);
    println!("Pending conflicts:  {}", result.pending_conflicts);
    match result.last_sync_at {
        Some(at) => println!("Last sync:          {at}"),
        None => println!("Last sync:          never"),
    }
    if let Some(token) = &result.last_sync_token {
        println!("Token:              {token}");
    }
    if result.consecutive_failures > 0 {
        println!("Failures:           {}", result.consecutive_failures);
    }
    if let Some(error) = &result.last_error {
        println!("Last error:         {error}");
    }
}
