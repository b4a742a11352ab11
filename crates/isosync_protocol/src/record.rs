//! Versioned records and their CRDT metadata.

use crate::codec::{from_cbor, to_cbor, CodecResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a record. Assigned at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record ID from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes of this ID.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Stable per-device identifier.
///
/// Only ever used as a deterministic tiebreaker, never for ordering edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(String);

impl SiteId {
    /// Creates a site ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the site ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A content field of a record that can be edited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordField {
    /// The record title.
    Name,
    /// The record body.
    Body,
    /// The short summary.
    Summary,
    /// The tag set.
    Tags,
}

impl RecordField {
    /// All content fields, in canonical order.
    pub const ALL: [RecordField; 4] = [
        RecordField::Name,
        RecordField::Body,
        RecordField::Summary,
        RecordField::Tags,
    ];

    /// Returns the persisted field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Name => "name",
            RecordField::Body => "body",
            RecordField::Summary => "summary",
            RecordField::Tags => "tags",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown record field: {s}"))
    }
}

/// SHA-256 over a record's content fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Returns the raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Per-record metadata used to detect and order conflicting edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdtMetadata {
    /// Device that produced this revision.
    pub site_id: SiteId,
    /// Number of field-level changes applied to this record.
    pub column_version: u64,
    /// Logical clock of the writing device, stamped by the local store.
    pub db_version: u64,
    /// Hash of the content fields.
    pub content_hash: ContentHash,
    /// Fields touched since the last successful sync.
    pub modified_fields: BTreeSet<RecordField>,
}

impl CrdtMetadata {
    /// Creates metadata for a freshly created record.
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            column_version: 0,
            db_version: 0,
            content_hash: ContentHash::default(),
            modified_fields: BTreeSet::new(),
        }
    }
}

/// A versioned unit of synchronized data.
///
/// # Versioning
///
/// - `version` is bumped on every local edit.
/// - `sync_version` advances by exactly one per successful push or per
///   conflict resolution, and never decreases.
/// - `base_version` is the remote revision this copy was last reconciled
///   against. Pushes are checked against it, so a resolution that bumps
///   `sync_version` never lets a later push skip past a newer remote edit.
/// - `modified_at` / `last_synced_at` decide whether the record carries
///   unsynced local edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identity.
    pub id: RecordId,
    /// Title.
    pub name: String,
    /// Body text.
    pub body: String,
    /// Optional short summary.
    pub summary: Option<String>,
    /// Tags, kept sorted.
    pub tags: BTreeSet<String>,
    /// External source system (for imported records).
    pub source: Option<String>,
    /// Identifier within the external source.
    pub source_id: Option<String>,
    /// Creation time (unix ms).
    pub created_at: i64,
    /// Last local mutation (unix ms).
    pub modified_at: i64,
    /// Content version.
    pub version: u64,
    /// Sync version.
    pub sync_version: u64,
    /// Remote revision the local copy is based on.
    #[serde(default)]
    pub base_version: u64,
    /// Last remote acknowledgment (unix ms), `None` if never synced.
    pub last_synced_at: Option<i64>,
    /// When a merge or manual resolution last produced this revision.
    pub conflict_resolved_at: Option<i64>,
    /// Set when the record was deleted locally and the deletion is not yet pushed.
    pub deleted_at: Option<i64>,
    /// CRDT metadata.
    pub crdt: CrdtMetadata,
}

impl Record {
    /// Creates a new, never-synced record.
    pub fn new(site_id: SiteId, name: impl Into<String>, body: impl Into<String>, now: i64) -> Self {
        let mut record = Self {
            id: RecordId::new(),
            name: name.into(),
            body: body.into(),
            summary: None,
            tags: BTreeSet::new(),
            source: None,
            source_id: None,
            created_at: now,
            modified_at: now,
            version: 1,
            sync_version: 0,
            base_version: 0,
            last_synced_at: None,
            conflict_resolved_at: None,
            deleted_at: None,
            crdt: CrdtMetadata::new(site_id),
        };
        record.crdt.modified_fields.extend([RecordField::Name, RecordField::Body]);
        record.refresh_content_hash();
        record
    }

    /// Sets the external source identity.
    pub fn with_source(mut self, source: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self.source_id = Some(source_id.into());
        self
    }

    /// Replaces the name.
    pub fn set_name(&mut self, name: impl Into<String>, now: i64) {
        self.name = name.into();
        self.touch(RecordField::Name, now);
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: impl Into<String>, now: i64) {
        self.body = body.into();
        self.touch(RecordField::Body, now);
    }

    /// Replaces the summary.
    pub fn set_summary(&mut self, summary: Option<String>, now: i64) {
        self.summary = summary;
        self.touch(RecordField::Summary, now);
    }

    /// Adds a tag. Returns false if it was already present.
    pub fn add_tag(&mut self, tag: impl Into<String>, now: i64) -> bool {
        let added = self.tags.insert(tag.into());
        if added {
            self.touch(RecordField::Tags, now);
        }
        added
    }

    /// Removes a tag. Returns false if it was absent.
    pub fn remove_tag(&mut self, tag: &str, now: i64) -> bool {
        let removed = self.tags.remove(tag);
        if removed {
            self.touch(RecordField::Tags, now);
        }
        removed
    }

    /// Marks the record as deleted locally. The deletion syncs like an edit.
    pub fn tombstone(&mut self, now: i64) {
        self.deleted_at = Some(now);
        self.version += 1;
        self.modified_at = self.edit_time(now);
        self.refresh_content_hash();
    }

    /// Returns true if this record is a pending local deletion.
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if the record was never synced or was edited since.
    pub fn has_local_changes(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced_at) => self.modified_at > synced_at,
        }
    }

    /// Records a remote acknowledgment of this revision at `now`.
    ///
    /// The current `sync_version` becomes the base for the next push.
    pub fn mark_synced(&mut self, now: i64) {
        self.base_version = self.sync_version;
        // Never stamp below modified_at, or a skewed clock would leave the
        // record looking dirty forever.
        self.last_synced_at = Some(now.max(self.modified_at));
        self.crdt.modified_fields.clear();
    }

    /// Stamps a conflict resolution as a local edit so the next cycle
    /// pushes it.
    pub fn mark_resolved(&mut self, now: i64) {
        self.conflict_resolved_at = Some(now);
        self.modified_at = self.edit_time(now);
        self.refresh_content_hash();
    }

    /// Returns true if both records carry identical content.
    pub fn same_content(&self, other: &Record) -> bool {
        self.crdt.content_hash == other.crdt.content_hash
    }

    /// Recomputes `crdt.content_hash` from the content fields.
    pub fn refresh_content_hash(&mut self) {
        self.crdt.content_hash = self.compute_content_hash();
    }

    /// Computes the content hash without storing it.
    pub fn compute_content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        hash_str(&mut hasher, &self.name);
        hash_str(&mut hasher, &self.body);
        match &self.summary {
            Some(summary) => {
                hasher.update([1u8]);
                hash_str(&mut hasher, summary);
            }
            None => hasher.update([0u8]),
        }
        hasher.update((self.tags.len() as u64).to_le_bytes());
        for tag in &self.tags {
            hash_str(&mut hasher, tag);
        }
        hasher.update([u8::from(self.deleted_at.is_some())]);
        ContentHash(hasher.finalize().into())
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }

    fn touch(&mut self, field: RecordField, now: i64) {
        self.version += 1;
        self.modified_at = self.edit_time(now);
        self.crdt.column_version += 1;
        self.crdt.modified_fields.insert(field);
        self.refresh_content_hash();
    }

    /// An edit always lands after the last sync, even within the same
    /// millisecond, or it would never be pushed.
    fn edit_time(&self, now: i64) -> i64 {
        match self.last_synced_at {
            Some(synced_at) if now <= synced_at => synced_at + 1,
            _ => now,
        }
    }
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
