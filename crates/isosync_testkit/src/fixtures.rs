//! Record fixtures.
//!
//! Provides a builder for records in the states sync tests care about
//! (never synced, synced, edited since sync, deleted) and a few ready-made
//! divergent pairs.

use isosync_protocol::{Record, SiteId};

/// Base timestamp for fixtures, in epoch milliseconds.
pub const T0: i64 = 1_700_000_000_000;

/// Site ID used for fixture records unless overridden.
pub const LOCAL_SITE: &str = "local";

/// Site ID used for the remote side of fixture pairs.
pub const REMOTE_SITE: &str = "remote";

/// Builds a [`Record`] step by step.
///
/// Steps apply in call order, so `synced` followed by `body` yields a record
/// with local changes, while the reverse yields a clean one.
///
/// # Example
///
/// ```rust
/// use isosync_testkit::{RecordBuilder, T0};
///
/// let record = RecordBuilder::new("notes")
///     .synced(3)
///     .body("edited", T0 + 10)
///     .build();
/// assert_eq!(record.sync_version, 3);
/// assert!(record.has_local_changes());
/// ```
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Starts a never-synced record created at [`T0`] on [`LOCAL_SITE`].
    pub fn new(name: &str) -> Self {
        Self::at(name, T0)
    }

    /// Starts a never-synced record created at `now`.
    pub fn at(name: &str, now: i64) -> Self {
        Self {
            record: Record::new(SiteId::new(LOCAL_SITE), name, "", now),
        }
    }

    /// Continues from an existing record.
    pub fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// Sets the originating site.
    pub fn site(mut self, site: &str) -> Self {
        self.record.crdt.site_id = SiteId::new(site);
        self
    }

    /// Sets the external source identity.
    pub fn source(mut self, source: &str, source_id: &str) -> Self {
        self.record = self.record.with_source(source, source_id);
        self
    }

    /// Edits the body at `now`.
    pub fn body(mut self, body: &str, now: i64) -> Self {
        self.record.set_body(body, now);
        self
    }

    /// Edits the summary at `now`.
    pub fn summary(mut self, summary: &str, now: i64) -> Self {
        self.record.set_summary(Some(summary.to_string()), now);
        self
    }

    /// Adds a tag at `now`.
    pub fn tag(mut self, tag: &str, now: i64) -> Self {
        self.record.add_tag(tag, now);
        self
    }

    /// Marks the record as acknowledged by the remote at `sync_version`,
    /// which becomes its base.
    pub fn synced(mut self, sync_version: u64) -> Self {
        self.record.sync_version = sync_version;
        let at = self.record.modified_at;
        self.record.mark_synced(at);
        self
    }

    /// Tombstones the record at `now`.
    pub fn deleted(mut self, now: i64) -> Self {
        self.record.tombstone(now);
        self
    }

    /// Finishes the record.
    pub fn build(self) -> Record {
        self.record
    }
}

/// Returns a local/remote pair that both edited the body after a common
/// synced base at `sync_version` 1.
///
/// The local copy is edited at `T0 + 10` and is dirty. The remote copy was
/// edited at `T0 + 5` on [`REMOTE_SITE`] and acknowledged at `sync_version` 2.
pub fn both_modified_pair(local_body: &str, remote_body: &str) -> (Record, Record) {
    let base = RecordBuilder::new("shared").body("base", T0).synced(1).build();

    let local = RecordBuilder::from_record(base.clone())
        .body(local_body, T0 + 10)
        .build();
    let remote = RecordBuilder::from_record(base)
        .site(REMOTE_SITE)
        .body(remote_body, T0 + 5)
        .synced(2)
        .build();
    (local, remote)
}

/// Returns a synced record and a remote revision that changed its body.
pub fn remote_update_pair(new_body: &str) -> (Record, Record) {
    let local = RecordBuilder::new("shared").body("base", T0).synced(1).build();
    let remote = RecordBuilder::from_record(local.clone())
        .site(REMOTE_SITE)
        .body(new_body, T0 + 5)
        .synced(2)
        .build();
    (local, remote)
}

/// Returns `count` never-synced records named `record-<n>`.
pub fn fresh_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            RecordBuilder::at(&format!("record-{i}"), T0 + i as i64)
                .body(&format!("body {i}"), T0 + i as i64)
                .build()
        })
        .collect()
}
