//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, edits and divergent record
//! pairs that keep the record invariants (content hash, version counters)
//! intact, since every mutation goes through the record's own setters.

use crate::fixtures::{REMOTE_SITE, T0};
use isosync_protocol::{ConflictStrategy, Record, SiteId};
use proptest::prelude::*;

/// Strategy for generating site IDs.
pub fn site_id_strategy() -> impl Strategy<Value = SiteId> {
    "[a-z]{1,8}".prop_map(SiteId::new)
}

/// Strategy for generating tags.
pub fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

/// Strategy for generating short free text.
pub fn text_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,24}"
}

/// Strategy for generating any conflict strategy.
pub fn conflict_strategy_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop::sample::select(ConflictStrategy::ALL.to_vec())
}

/// Strategy for generating never-synced records.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        site_id_strategy(),
        "[a-z]{1,12}",
        text_strategy(),
        prop::collection::btree_set(tag_strategy(), 0..4),
        0i64..10_000,
    )
        .prop_map(|(site, name, body, tags, offset)| {
            let now = T0 + offset;
            let mut record = Record::new(site, name, body, now);
            for tag in tags {
                record.add_tag(tag, now);
            }
            record
        })
}

/// Strategy for generating records the remote has acknowledged.
pub fn synced_record_strategy() -> impl Strategy<Value = Record> {
    (record_strategy(), 1u64..10).prop_map(|(mut record, sync_version)| {
        record.sync_version = sync_version;
        let at = record.modified_at;
        record.mark_synced(at);
        record
    })
}

/// A single user edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Rename.
    Name(String),
    /// Replace the body.
    Body(String),
    /// Replace the summary.
    Summary(Option<String>),
    /// Add a tag.
    AddTag(String),
    /// Remove a tag.
    RemoveTag(String),
}

impl Edit {
    /// Applies the edit at `now`.
    pub fn apply(&self, record: &mut Record, now: i64) {
        match self {
            Edit::Name(name) => record.set_name(name.clone(), now),
            Edit::Body(body) => record.set_body(body.clone(), now),
            Edit::Summary(summary) => record.set_summary(summary.clone(), now),
            Edit::AddTag(tag) => {
                record.add_tag(tag.clone(), now);
            }
            Edit::RemoveTag(tag) => {
                record.remove_tag(tag, now);
            }
        }
    }
}

/// Strategy for generating edits.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        "[a-z]{1,12}".prop_map(Edit::Name),
        text_strategy().prop_map(Edit::Body),
        prop::option::of(text_strategy()).prop_map(Edit::Summary),
        tag_strategy().prop_map(Edit::AddTag),
        tag_strategy().prop_map(Edit::RemoveTag),
    ]
}

/// Strategy for generating a local/remote pair descended from one synced base.
///
/// The local side applies its edits after the remote side and stays dirty;
/// the remote side is acknowledged one `sync_version` ahead. Edits may be
/// no-ops (removing an absent tag), so the pair is not always a conflict.
pub fn divergent_pair_strategy() -> impl Strategy<Value = (Record, Record)> {
    (
        synced_record_strategy(),
        prop::collection::vec(edit_strategy(), 1..4),
        prop::collection::vec(edit_strategy(), 1..4),
        1i64..1_000,
        1i64..1_000,
    )
        .prop_map(|(base, local_edits, remote_edits, local_dt, remote_dt)| {
            let start = base.modified_at;

            let mut remote = base.clone();
            remote.crdt.site_id = SiteId::new(REMOTE_SITE);
            for edit in &remote_edits {
                edit.apply(&mut remote, start + remote_dt);
            }
            remote.sync_version += 1;
            let at = remote.modified_at;
            remote.mark_synced(at);

            let mut local = base;
            for edit in &local_edits {
                edit.apply(&mut local, start + local_dt);
            }
            (local, remote)
        })
}
