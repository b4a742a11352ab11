//! Change feed: continuation tokens, change batches and the sequenced
//! change log a remote pages through.

use crate::record::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque continuation token issued by a remote.
///
/// Clients store and echo it back; only the issuing remote interprets the
/// bytes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Creates a token that encodes a change log sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(sequence.to_be_bytes().to_vec())
    }

    /// Decodes a sequence number token. Returns `None` for foreign tokens.
    pub fn sequence(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Created or updated records.
    pub changed: Vec<Record>,
    /// IDs of records deleted on the remote.
    pub deleted_ids: Vec<RecordId>,
    /// Token to resume from after this page.
    pub new_token: Option<ChangeToken>,
    /// True if more pages are available.
    pub has_more: bool,
}

impl ChangeBatch {
    /// Returns the number of changes in this page.
    pub fn len(&self) -> usize {
        self.changed.len() + self.deleted_ids.len()
    }

    /// Returns true if this page carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted_ids.is_empty()
    }
}

/// Kind of a change log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Record was created or updated.
    Changed,
    /// Record was deleted.
    Deleted,
}

/// A single entry in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Sequence number assigned at emit time.
    pub sequence: u64,
    /// Affected record.
    pub record_id: RecordId,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// Sequenced log of record changes.
///
/// The log keeps only the latest entry per record, so a page never carries
/// the same record twice and an update followed by a delete collapses into
/// the delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFeed {
    /// Entries in sequence order.
    entries: Vec<ChangeEntry>,
    /// Next sequence number.
    next_sequence: u64,
}

impl ChangeFeed {
    /// Creates a new empty change feed.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Emits a change and returns its sequence number.
    pub fn emit(&mut self, record_id: RecordId, kind: ChangeKind) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.retain(|e| e.record_id != record_id);
        self.entries.push(ChangeEntry {
            sequence,
            record_id,
            kind,
        });
        sequence
    }

    /// Polls entries with sequence > `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> &[ChangeEntry] {
        let start = self.entries.partition_point(|e| e.sequence <= cursor);
        let end = start.saturating_add(limit).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Returns true if entries exist after `sequence`.
    pub fn has_after(&self, sequence: u64) -> bool {
        self.entries.last().is_some_and(|e| e.sequence > sequence)
    }

    /// Returns the latest sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the feed is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
