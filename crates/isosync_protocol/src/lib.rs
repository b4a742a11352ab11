//! # Isosync Protocol
//!
//! Data model and pure sync rules shared by every isosync replica.
//!
//! This crate provides:
//! - `Record` with its CRDT metadata and content hash
//! - `SyncConflict`, `ConflictStrategy` and deterministic resolution
//! - `ChangeToken`, `ChangeBatch` and the sequenced `ChangeFeed`
//! - `SyncState` bookkeeping
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod codec;
mod conflict;
mod record;
mod state;

pub use change_feed::{ChangeBatch, ChangeEntry, ChangeFeed, ChangeKind, ChangeToken};
pub use codec::{from_cbor, to_cbor, CodecError, CodecResult};
pub use conflict::{
    detect_conflict, reconcile, ConflictId, ConflictResolution, ConflictStrategy, ConflictType,
    PendingConflict, Reconciliation, SyncConflict,
};
pub use record::{ContentHash, CrdtMetadata, Record, RecordField, RecordId, SiteId};
pub use state::SyncState;
