//! Conflict commands: list queued conflicts and resolve them.

use crate::files::ReplicaFile;
use isosync_engine::{Clock, ConflictResolver, SystemClock};
use isosync_protocol::{ConflictId, SyncConflict};
use serde::Serialize;
use std::path::Path;

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Side {
    /// Keep this replica's copy.
    Local,
    /// Keep the remote copy.
    Remote,
}

/// One queued conflict.
#[derive(Debug, Serialize)]
pub struct ConflictRow {
    /// Conflict ID, passed to `resolve`.
    pub id: String,
    /// Record ID.
    pub record_id: String,
    /// How the copies diverged.
    pub conflict_type: String,
    /// Fields that differ.
    pub fields: Vec<String>,
    /// Local name.
    pub local_name: String,
    /// Remote name.
    pub remote_name: String,
    /// Detection time (unix ms).
    pub detected_at: i64,
}

impl From<&SyncConflict> for ConflictRow {
    fn from(conflict: &SyncConflict) -> Self {
        Self {
            id: conflict.id.to_string(),
            record_id: conflict.record_id().to_string(),
            conflict_type: conflict.conflict_type.to_string(),
            fields: conflict
                .conflicted_fields
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            local_name: conflict.local.name.clone(),
            remote_name: conflict.remote.name.clone(),
            detected_at: conflict.detected_at,
        }
    }
}

/// Lists conflicts awaiting manual resolution.
pub fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let replica = ReplicaFile::load(path)?;
    let conflicts = ConflictResolver::default().pending_conflicts(&replica.open_store())?;
    let rows: Vec<ConflictRow> = conflicts.iter().map(ConflictRow::from).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No pending conflicts");
            }
            for row in &rows {
                println!("{}  {}  record {}", row.id, row.conflict_type, row.record_id);
                println!("    fields: {}", row.fields.join(", "));
                println!("    local:  {}", row.local_name);
                println!("    remote: {}", row.remote_name);
            }
        }
    }
    Ok(())
}

/// Resolves a queued conflict by keeping one side.
pub fn resolve(path: &Path, id: &str, take: Side) -> Result<(), Box<dyn std::error::Error>> {
    let id: ConflictId = id.parse()?;
    let mut replica = ReplicaFile::load(path)?;
    let store = replica.open_store();
    let resolver = ConflictResolver::default();

    let conflict = resolver
        .pending_conflicts(&store)?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| format!("no pending conflict {id}"))?;
    let chosen = match take {
        Side::Local => conflict.local,
        Side::Remote => conflict.remote,
    };

    let written = resolver.resolve_manual(&store, id, chosen, SystemClock.now_ms())?;
    replica.store = store.snapshot();
    replica.save(path)?;

    match written {
        Some(record) => println!(
            "Kept {take:?} copy of {}; it will be pushed on next sync",
            record.id
        ),
        None => println!("Record deleted"),
    }
    Ok(())
}
