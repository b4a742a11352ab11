//! Conflict detection and resolution.
//!
//! Everything here is a pure function of its inputs (including the caller's
//! clock reading), so every replica that resolves the same pair of records
//! with the same strategy produces the same winner.

use crate::codec::{CodecError, CodecResult};
use crate::record::{Record, RecordField, RecordId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a new random conflict ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How the local and remote copies diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    /// Both sides edited since the last common sync version.
    BothModified,
    /// The local copy is a pending deletion; the remote copy changed.
    LocalDeleted,
    /// The remote deleted the record; the local copy has unsynced edits.
    ServerDeleted,
    /// The local copy claims a newer sync version than the remote.
    VersionMismatch,
}

impl ConflictType {
    /// Returns the persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::BothModified => "both-modified",
            ConflictType::LocalDeleted => "local-deleted",
            ConflictType::ServerDeleted => "server-deleted",
            ConflictType::VersionMismatch => "version-mismatch",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A divergence between the local and remote copies of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict ID.
    pub id: ConflictId,
    /// Local snapshot.
    pub local: Record,
    /// Remote snapshot. For [`ConflictType::ServerDeleted`] this is a
    /// tombstone of the last state both sides agreed on.
    pub remote: Record,
    /// Detection time (unix ms).
    pub detected_at: i64,
    /// Kind of divergence.
    pub conflict_type: ConflictType,
    /// Content fields whose values differ between the two snapshots.
    pub conflicted_fields: BTreeSet<RecordField>,
}

impl SyncConflict {
    /// Creates a conflict between two live snapshots.
    pub fn new(local: Record, remote: Record, conflict_type: ConflictType, detected_at: i64) -> Self {
        let conflicted_fields = differing_fields(&local, &remote);
        Self {
            id: ConflictId::new(),
            local,
            remote,
            detected_at,
            conflict_type,
            conflicted_fields,
        }
    }

    /// Creates a conflict for a remote deletion that hit a locally edited record.
    pub fn server_deleted(local: Record, detected_at: i64) -> Self {
        let mut remote = local.clone();
        // The deletion is dated at the last point both sides agreed, so any
        // unsynced local edit is newer than it.
        remote.modified_at = local.last_synced_at.unwrap_or(local.created_at);
        remote.deleted_at = Some(detected_at);
        remote.refresh_content_hash();
        Self::new(local, remote, ConflictType::ServerDeleted, detected_at)
    }

    /// Returns the ID of the conflicted record.
    pub fn record_id(&self) -> RecordId {
        self.local.id
    }

    /// Returns the remote revision a resolved record is based on.
    ///
    /// A server deletion leaves nothing newer on the remote, so the local
    /// base stands.
    pub fn remote_base(&self) -> u64 {
        match self.conflict_type {
            ConflictType::ServerDeleted => self.local.base_version,
            _ => self.remote.sync_version,
        }
    }
}

/// Outcome of comparing a local record with an incoming remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Remote is newer and the local copy has no unsynced edits.
    ApplyRemote,
    /// The local copy is at least as new; nothing to apply.
    KeepLocal,
    /// Both carry identical content; only sync metadata needs adopting.
    InSync,
    /// The copies diverged.
    Conflict(SyncConflict),
}

/// Compares a local record with its incoming remote counterpart.
///
/// The remote's `sync_version` is compared with the local `base_version`,
/// so a remote revision the local copy was already reconciled against is
/// never a conflict twice.
pub fn reconcile(local: &Record, remote: &Record, now: i64) -> Reconciliation {
    if local.has_local_changes() {
        if local.same_content(remote) {
            Reconciliation::InSync
        } else if remote.sync_version > local.base_version {
            let conflict_type = if local.is_tombstone() {
                ConflictType::LocalDeleted
            } else if remote.sync_version > local.sync_version {
                ConflictType::BothModified
            } else {
                ConflictType::VersionMismatch
            };
            Reconciliation::Conflict(SyncConflict::new(
                local.clone(),
                remote.clone(),
                conflict_type,
                now,
            ))
        } else {
            // Remote is the revision our edits are based on, or older.
            Reconciliation::KeepLocal
        }
    } else if remote.sync_version > local.base_version
        || (remote.sync_version == local.base_version && !local.same_content(remote))
    {
        Reconciliation::ApplyRemote
    } else {
        Reconciliation::KeepLocal
    }
}

/// Returns the conflict between `local` and `remote`, if any.
///
/// A conflict exists iff the local record has unsynced edits, the remote
/// moved past the local base, and the content is not identical.
pub fn detect_conflict(local: &Record, remote: &Record, now: i64) -> Option<SyncConflict> {
    match reconcile(local, remote, now) {
        Reconciliation::Conflict(conflict) => Some(conflict),
        _ => None,
    }
}

/// Strategy for resolving conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The remote record replaces the local one.
    ServerWins,
    /// The local record is kept and will supersede the remote on next push.
    LocalWins,
    /// The record with the later `modified_at` wins.
    #[default]
    LatestWins,
    /// Content from the newer side, tags unioned.
    FieldLevelMerge,
    /// Nothing is written; the pair is queued for an explicit decision.
    Manual,
}

impl ConflictStrategy {
    /// All strategies.
    pub const ALL: [ConflictStrategy; 5] = [
        ConflictStrategy::ServerWins,
        ConflictStrategy::LocalWins,
        ConflictStrategy::LatestWins,
        ConflictStrategy::FieldLevelMerge,
        ConflictStrategy::Manual,
    ];

    /// Returns true if this strategy resolves conflicts without user input.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }

    /// Returns the persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::LocalWins => "local-wins",
            ConflictStrategy::LatestWins => "latest-wins",
            ConflictStrategy::FieldLevelMerge => "field-level-merge",
            ConflictStrategy::Manual => "manual",
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictStrategy::ServerWins => 1,
            ConflictStrategy::LocalWins => 2,
            ConflictStrategy::LatestWins => 3,
            ConflictStrategy::FieldLevelMerge => 4,
            ConflictStrategy::Manual => 5,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictStrategy::ServerWins),
            2 => Some(ConflictStrategy::LocalWins),
            3 => Some(ConflictStrategy::LatestWins),
            4 => Some(ConflictStrategy::FieldLevelMerge),
            5 => Some(ConflictStrategy::Manual),
            _ => None,
        }
    }

    /// Resolves a conflict according to this strategy.
    ///
    /// `now` is only used for timestamps on the result, never to pick a winner.
    /// Every resolved record is based on the remote revision, so a local
    /// winner is pushed against it and a remote winner needs no push.
    pub fn resolve(&self, conflict: &SyncConflict, now: i64) -> ConflictResolution {
        let local = &conflict.local;
        let remote = &conflict.remote;

        let mut record = match self {
            ConflictStrategy::ServerWins => {
                let mut record = remote.clone();
                record.mark_synced(now);
                record.sync_version = remote.sync_version.max(local.sync_version);
                Some(record)
            }
            ConflictStrategy::LocalWins => {
                let mut record = local.clone();
                record.sync_version = local.sync_version.max(remote.sync_version + 1);
                Some(record)
            }
            ConflictStrategy::LatestWins => {
                let bumped = local.sync_version.max(remote.sync_version) + 1;
                let record = match newer_side(local, remote) {
                    Side::Local => {
                        let mut record = local.clone();
                        record.sync_version = bumped;
                        record
                    }
                    Side::Remote => {
                        let mut record = remote.clone();
                        record.mark_synced(now);
                        record.sync_version = bumped;
                        record
                    }
                };
                Some(record)
            }
            ConflictStrategy::FieldLevelMerge => Some(merge_fields(local, remote, now)),
            ConflictStrategy::Manual => None,
        };
        if let Some(record) = record.as_mut() {
            record.base_version = conflict.remote_base();
        }

        ConflictResolution {
            conflict_id: conflict.id,
            record,
            strategy: *self,
            resolved_at: now,
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConflictStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| format!("unknown conflict strategy: {s}"))
    }
}

/// Result of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    /// The conflict that was resolved.
    pub conflict_id: ConflictId,
    /// The record to write, or `None` if the decision was deferred.
    pub record: Option<Record>,
    /// Strategy applied.
    pub strategy: ConflictStrategy,
    /// Resolution time (unix ms).
    pub resolved_at: i64,
}

impl ConflictResolution {
    /// Returns true if the decision was deferred to the manual queue.
    pub fn is_deferred(&self) -> bool {
        self.record.is_none()
    }
}

/// Durable form of a conflict awaiting manual resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConflict {
    /// Conflict ID.
    pub id: ConflictId,
    /// Conflicted record.
    pub record_id: RecordId,
    /// Kind of divergence.
    pub conflict_type: ConflictType,
    /// CBOR-encoded local snapshot.
    pub local_snapshot: Vec<u8>,
    /// CBOR-encoded remote snapshot.
    pub remote_snapshot: Vec<u8>,
    /// Detection time (unix ms).
    pub detected_at: i64,
    /// Names of the fields that differ.
    pub conflicted_fields: Vec<String>,
}

impl PendingConflict {
    /// Serializes a conflict for the durable queue.
    pub fn from_conflict(conflict: &SyncConflict) -> CodecResult<Self> {
        Ok(Self {
            id: conflict.id,
            record_id: conflict.record_id(),
            conflict_type: conflict.conflict_type,
            local_snapshot: conflict.local.encode()?,
            remote_snapshot: conflict.remote.encode()?,
            detected_at: conflict.detected_at,
            conflicted_fields: conflict
                .conflicted_fields
                .iter()
                .map(|field| field.as_str().to_string())
                .collect(),
        })
    }

    /// Restores the conflict from its durable form.
    pub fn to_conflict(&self) -> CodecResult<SyncConflict> {
        let conflicted_fields = self
            .conflicted_fields
            .iter()
            .map(|name| name.parse::<RecordField>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(CodecError::decoding_failed)?;

        Ok(SyncConflict {
            id: self.id,
            local: Record::decode(&self.local_snapshot)?,
            remote: Record::decode(&self.remote_snapshot)?,
            detected_at: self.detected_at,
            conflict_type: self.conflict_type,
            conflicted_fields,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Picks the later edit; equal timestamps fall back to the greater site ID.
fn newer_side(local: &Record, remote: &Record) -> Side {
    let by_time = local.modified_at.cmp(&remote.modified_at);
    let ordering = by_time.then_with(|| local.crdt.site_id.cmp(&remote.crdt.site_id));
    match ordering {
        Ordering::Greater => Side::Local,
        Ordering::Less | Ordering::Equal => Side::Remote,
    }
}

fn merge_fields(local: &Record, remote: &Record, now: i64) -> Record {
    let (base, other) = match newer_side(local, remote) {
        Side::Local => (local, remote),
        Side::Remote => (remote, local),
    };

    let mut merged = base.clone();
    merged.tags = base.tags.union(&other.tags).cloned().collect();
    merged.version = local.version.max(remote.version) + 1;
    merged.sync_version = local.sync_version.max(remote.sync_version) + 1;
    merged.modified_at = local.modified_at.max(remote.modified_at);
    merged.last_synced_at = local.last_synced_at;
    merged.conflict_resolved_at = Some(now);
    merged.crdt.column_version = local.crdt.column_version.max(remote.crdt.column_version) + 1;
    merged.crdt.modified_fields = local
        .crdt
        .modified_fields
        .union(&remote.crdt.modified_fields)
        .copied()
        .collect();
    merged.refresh_content_hash();
    merged
}

fn differing_fields(local: &Record, remote: &Record) -> BTreeSet<RecordField> {
    RecordField::ALL
        .into_iter()
        .filter(|field| match field {
            RecordField::Name => local.name != remote.name,
            RecordField::Body => local.body != remote.body,
            RecordField::Summary => local.summary != remote.summary,
            RecordField::Tags => local.tags != remote.tags,
        })
        .collect()
}
